use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::error::{Result, TemplateError};
use crate::evaluator::{ContextResolver, Evaluator, PlaceholderMap, Resolver};
use crate::placeholder::{locate_placeholders, Placeholder, Syntax};
use crate::replacer::{NoopObserver, ReplaceObserver, ReplaceReport, ReplacementEngine};
use crate::run::{parse_runs, Runs};
use crate::store::{DocumentStore, Part};

/// Placeholders located in one part.
#[derive(Debug, Clone, Serialize)]
pub struct PartPlaceholders {
    pub part: String,
    pub placeholders: Vec<Placeholder>,
}

/// An open DOCX template.
///
/// Every XML part is checked for well-formed run structure on open, so a
/// malformed template fails before any substitution is attempted.
/// Substitution passes are all-or-nothing: a fatal error in any part leaves
/// every part unchanged.
pub struct Document<R = File> {
    store: DocumentStore<R>,
    observer: Box<dyn ReplaceObserver>,
}

impl Document<File> {
    /// Open a template on disk. The file stays locked until the document is
    /// closed or dropped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_store(DocumentStore::open(path)?)
    }
}

impl Document<Cursor<Vec<u8>>> {
    pub fn open_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_store(DocumentStore::from_bytes(bytes)?)
    }
}

impl<R: Read + Seek> Document<R> {
    pub fn from_reader(reader: R) -> Result<Self> {
        Self::from_store(DocumentStore::new(reader)?)
    }

    fn from_store(store: DocumentStore<R>) -> Result<Self> {
        for part in store.parts().filter(|part| part.kind().is_xml()) {
            let runs = parse_part(part)?;
            debug!("Parsed {}: {} runs", part.name(), runs.len());
        }

        Ok(Self {
            store,
            observer: Box::new(NoopObserver),
        })
    }

    pub fn set_observer(&mut self, observer: impl ReplaceObserver + 'static) {
        self.observer = Box::new(observer);
    }

    pub fn with_observer(mut self, observer: impl ReplaceObserver + 'static) -> Self {
        self.set_observer(observer);
        self
    }

    pub fn store(&self) -> &DocumentStore<R> {
        &self.store
    }

    pub fn get_file(&self, name: &str) -> Option<&[u8]> {
        self.store.get(name)
    }

    /// Overwrite a part that exists in the template, e.g. an image under
    /// `word/media/`.
    pub fn set_file(&mut self, name: &str, bytes: Vec<u8>) -> Result<()> {
        self.store.set(name, bytes)?;
        debug!("Replaced {}", name);
        Ok(())
    }

    /// Substitute every `{{expr}}` placeholder using `evaluator`.
    ///
    /// With no context nothing resolves and the document is left as is.
    #[instrument(level = "debug", skip_all)]
    pub fn execute_template<E>(&mut self, evaluator: &E, context: Option<&E::Context>) -> Result<ReplaceReport>
    where
        E: Evaluator + ?Sized,
    {
        let resolver = ContextResolver::new(evaluator, context);
        self.apply(Syntax::Expression, &resolver)
    }

    /// Substitute every `{key}` placeholder found in `map`.
    #[instrument(level = "debug", skip_all, fields(keys = map.len()))]
    pub fn replace_all(&mut self, map: &PlaceholderMap) -> Result<ReplaceReport> {
        self.apply(Syntax::Simple, map)
    }

    fn apply(&mut self, syntax: Syntax, resolver: &dyn Resolver) -> Result<ReplaceReport> {
        let engine = ReplacementEngine::with_observer(self.observer.as_ref());
        let mut report = ReplaceReport::default();
        let mut rewritten = Vec::new();

        for part in self.store.parts().filter(|part| part.kind().is_xml()) {
            let runs = parse_part(part)?;
            let placeholders = locate_placeholders(&runs, part.bytes(), syntax);
            if placeholders.is_empty() {
                continue;
            }

            let mut bytes = part.bytes().to_vec();
            let part_report = engine.replace(part.name(), &mut bytes, placeholders, resolver)?;
            debug!(
                "{}: {} substituted, {} skipped",
                part.name(),
                part_report.substituted,
                part_report.skipped
            );

            if part_report.substituted > 0 {
                rewritten.push((part.name().to_string(), bytes));
            }
            report += part_report;
        }

        for (name, bytes) in rewritten {
            self.store.set(&name, bytes)?;
        }

        info!(
            "Template pass done: {} substituted, {} skipped",
            report.substituted, report.skipped
        );
        Ok(report)
    }

    /// Every placeholder of `syntax`, grouped by part in archive order.
    /// Parts without placeholders are omitted.
    pub fn placeholders(&self, syntax: Syntax) -> Result<Vec<PartPlaceholders>> {
        let mut found = Vec::new();
        for part in self.store.parts().filter(|part| part.kind().is_xml()) {
            let runs = parse_part(part)?;
            let placeholders = locate_placeholders(&runs, part.bytes(), syntax);
            if !placeholders.is_empty() {
                found.push(PartPlaceholders {
                    part: part.name().to_string(),
                    placeholders,
                });
            }
        }
        Ok(found)
    }

    /// Sorted `{key}` names that `map` has no entry for.
    pub fn missing_keys(&self, map: &PlaceholderMap) -> Result<Vec<String>> {
        let missing: BTreeSet<String> = self
            .placeholders(Syntax::Simple)?
            .into_iter()
            .flat_map(|part| part.placeholders)
            .filter(|placeholder| !map.contains_key(&placeholder.key))
            .map(|placeholder| placeholder.key)
            .collect();
        Ok(missing.into_iter().collect())
    }

    /// Write the resulting archive to `writer` and hand it back.
    pub fn write<W: Write + Seek>(&mut self, writer: W) -> Result<W> {
        self.store.finalize(writer)
    }

    pub fn write_to_bytes(&mut self) -> Result<Vec<u8>> {
        Ok(self.write(Cursor::new(Vec::new()))?.into_inner())
    }

    /// Write the resulting archive to `path`.
    ///
    /// Missing parent directories are created. The archive is written to a
    /// sibling temp file and renamed into place, so a failure never leaves a
    /// partial output behind.
    #[instrument(level = "debug", skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn write_to_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(source) = self.store.source_path() {
            if path.canonicalize().is_ok_and(|target| target == source) {
                return Err(TemplateError::SelfOverwrite(path.to_path_buf()));
            }
        }

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| TemplateError::io("create directory", parent, e))?;
        }

        let temp_path = path.with_extension("docx.tmp");
        let file = File::create(&temp_path).map_err(|e| TemplateError::io("create", &temp_path, e))?;

        let written = self.write(BufWriter::new(file)).and_then(|mut writer| {
            writer
                .flush()
                .map_err(|e| TemplateError::io("write", &temp_path, e))
        });
        if let Err(err) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(err);
        }

        if let Err(err) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(TemplateError::io("rename", path, err));
        }

        info!("Wrote {}", path.display());
        Ok(())
    }

    /// Release the template and its lock.
    pub fn close(self) {}
}

impl<R> std::fmt::Debug for Document<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document").field("store", &self.store).finish()
    }
}

fn parse_part(part: &Part) -> Result<Runs> {
    parse_runs(part.bytes()).map_err(|source| TemplateError::Parse {
        part: part.name().to_string(),
        source,
    })
}

/// `report.docx` becomes `report_output.docx` next to the template.
pub fn default_output_path(template: impl AsRef<Path>) -> PathBuf {
    let template = template.as_ref();
    let stem = template.file_stem().unwrap_or_default().to_string_lossy();

    let mut name = format!("{}_output", stem);
    if let Some(extension) = template.extension() {
        name.push('.');
        name.push_str(&extension.to_string_lossy());
    }
    template.with_file_name(name)
}

/// Open `template`, render it against `context` and write the result to
/// `output`, or next to the template when `output` is `None`. Returns the
/// path written.
pub fn complete_template<E>(
    template: impl AsRef<Path>,
    evaluator: &E,
    context: Option<&E::Context>,
    output: Option<&Path>,
) -> Result<PathBuf>
where
    E: Evaluator + ?Sized,
{
    let template = template.as_ref();
    let output = output.map_or_else(|| default_output_path(template), Path::to_path_buf);

    let mut document = Document::open(template)?;
    document.execute_template(evaluator, context)?;
    document.write_to_file(&output)?;
    Ok(output)
}

pub fn complete_template_to_bytes<E>(
    template: impl AsRef<Path>,
    evaluator: &E,
    context: Option<&E::Context>,
) -> Result<Vec<u8>>
where
    E: Evaluator + ?Sized,
{
    let mut document = Document::open(template)?;
    document.execute_template(evaluator, context)?;
    document.write_to_bytes()
}

pub fn complete_template_from_bytes<E>(
    template: Vec<u8>,
    evaluator: &E,
    context: Option<&E::Context>,
) -> Result<Vec<u8>>
where
    E: Evaluator + ?Sized,
{
    let mut document = Document::open_bytes(template)?;
    document.execute_template(evaluator, context)?;
    document.write_to_bytes()
}

pub fn complete_replace_all(
    template: impl AsRef<Path>,
    map: &PlaceholderMap,
    output: Option<&Path>,
) -> Result<PathBuf> {
    let template = template.as_ref();
    let output = output.map_or_else(|| default_output_path(template), Path::to_path_buf);

    let mut document = Document::open(template)?;
    document.replace_all(map)?;
    document.write_to_file(&output)?;
    Ok(output)
}

pub fn complete_replace_all_from_bytes(template: Vec<u8>, map: &PlaceholderMap) -> Result<Vec<u8>> {
    let mut document = Document::open_bytes(template)?;
    document.replace_all(map)?;
    document.write_to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_path() {
        assert_eq!(default_output_path("report.docx"), PathBuf::from("report_output.docx"));
        assert_eq!(
            default_output_path("/tmp/in/letter.v2.docx"),
            PathBuf::from("/tmp/in/letter.v2_output.docx")
        );
        assert_eq!(default_output_path("archive"), PathBuf::from("archive_output"));
    }
}
