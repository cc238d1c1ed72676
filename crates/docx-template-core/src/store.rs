//! The zip container and the subset of its entries that may be rewritten.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use fs2::FileExt;
use regex::Regex;
use tracing::{debug, info, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Result, TemplateError};

pub const MAIN_DOCUMENT: &str = "word/document.xml";
pub const MEDIA_PREFIX: &str = "word/media/";

static HEADER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^word/header[0-9]*\.xml$").expect("invalid header pattern"));
static FOOTER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^word/footer[0-9]*\.xml$").expect("invalid footer pattern"));

/// Category of a mutable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartKind {
    MainDocument,
    Header,
    Footer,
    Media,
}

impl PartKind {
    /// `None` for entries that are copied through untouched.
    pub fn classify(name: &str) -> Option<Self> {
        if name == MAIN_DOCUMENT {
            Some(Self::MainDocument)
        } else if HEADER_PATTERN.is_match(name) {
            Some(Self::Header)
        } else if FOOTER_PATTERN.is_match(name) {
            Some(Self::Footer)
        } else if name.starts_with(MEDIA_PREFIX) && !name.ends_with('/') {
            Some(Self::Media)
        } else {
            None
        }
    }

    /// Whether parts of this kind carry runs and placeholders.
    pub fn is_xml(self) -> bool {
        !matches!(self, Self::Media)
    }
}

/// Current contents of one mutable entry.
#[derive(Debug, Clone)]
pub struct Part {
    name: String,
    kind: PartKind,
    bytes: Vec<u8>,
    modified: bool,
}

impl Part {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PartKind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }
}

/// Owns the source archive for the whole open/mutate/finalize cycle.
///
/// Mutable parts are read into memory on open. Every other entry stays in
/// the archive and is raw-copied on [`finalize`](Self::finalize).
pub struct DocumentStore<R> {
    archive: ZipArchive<R>,
    source: Option<PathBuf>,
    parts: HashMap<String, Part>,
    /// Mutable part names in archive order.
    order: Vec<String>,
}

impl DocumentStore<File> {
    /// Open a template file, holding an exclusive advisory lock on it until
    /// the store is dropped.
    #[instrument(level = "debug", skip(path), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| TemplateError::io("open", path, e))?;

        if let Err(err) = file.try_lock_exclusive() {
            return Err(if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                TemplateError::Locked(path.to_path_buf())
            } else {
                TemplateError::io("lock", path, err)
            });
        }

        let source = path
            .canonicalize()
            .map_err(|e| TemplateError::io("resolve", path, e))?;
        let mut store = Self::new(file)?;
        store.source = Some(source);
        info!("Opened template {} ({} mutable parts)", path.display(), store.order.len());
        Ok(store)
    }
}

impl DocumentStore<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> DocumentStore<R> {
    pub fn new(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let mut parts = HashMap::new();
        let mut order = Vec::new();

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let Some(kind) = PartKind::classify(&name) else {
                continue;
            };

            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| TemplateError::io("read part", &name, e))?;
            debug!("Loaded {} ({:?}, {} bytes)", name, kind, bytes.len());

            order.push(name.clone());
            parts.insert(
                name.clone(),
                Part {
                    name,
                    kind,
                    bytes,
                    modified: false,
                },
            );
        }

        if !parts.contains_key(MAIN_DOCUMENT) {
            return Err(TemplateError::MissingMainPart(MAIN_DOCUMENT.to_string()));
        }

        Ok(Self {
            archive,
            source: None,
            parts,
            order,
        })
    }

    /// Canonical path of the template when opened from disk.
    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.parts.get(name).map(|part| part.bytes.as_slice())
    }

    /// Replace the bytes of a part that exists in the source archive.
    pub fn set(&mut self, name: &str, bytes: Vec<u8>) -> Result<()> {
        let part = self
            .parts
            .get_mut(name)
            .ok_or_else(|| TemplateError::UnregisteredPart(name.to_string()))?;
        part.bytes = bytes;
        part.modified = true;
        Ok(())
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Mutable parts in archive order.
    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.order.iter().filter_map(|name| self.parts.get(name))
    }

    /// Write the archive to `writer`, entries in their original order.
    ///
    /// Modified parts are recompressed with their original method when it
    /// is stored, deflated otherwise. All other entries are copied raw.
    #[instrument(level = "debug", skip_all)]
    pub fn finalize<W: Write + Seek>(&mut self, writer: W) -> Result<W> {
        let mut zip = ZipWriter::new(writer);
        let mut rewritten = 0usize;

        for i in 0..self.archive.len() {
            let entry = self.archive.by_index_raw(i)?;
            let Some(part) = self.parts.get(entry.name()).filter(|part| part.modified) else {
                zip.raw_copy_file(entry)?;
                continue;
            };

            let method = match entry.compression() {
                CompressionMethod::Stored => CompressionMethod::Stored,
                _ => CompressionMethod::Deflated,
            };
            drop(entry);

            zip.start_file(part.name.as_str(), SimpleFileOptions::default().compression_method(method))?;
            zip.write_all(&part.bytes)
                .map_err(|e| TemplateError::io("write part", &part.name, e))?;
            rewritten += 1;
        }

        let writer = zip.finish()?;
        info!("Finalized archive ({} entries, {} rewritten)", self.archive.len(), rewritten);
        Ok(writer)
    }
}

impl<R> std::fmt::Debug for DocumentStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("source", &self.source)
            .field("parts", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(entries: &[(&str, &[u8], CompressionMethod)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data, method) in entries {
            zip.start_file(*name, SimpleFileOptions::default().compression_method(*method))
                .unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn setup() -> DocumentStore<Cursor<Vec<u8>>> {
        let bytes = build(&[
            ("[Content_Types].xml", &b"<Types/>"[..], CompressionMethod::Deflated),
            (MAIN_DOCUMENT, &b"<w:document/>"[..], CompressionMethod::Deflated),
            ("word/header1.xml", &b"<w:hdr/>"[..], CompressionMethod::Deflated),
            ("word/footer.xml", &b"<w:ftr/>"[..], CompressionMethod::Deflated),
            ("word/media/image1.png", &b"\x89PNG"[..], CompressionMethod::Stored),
            ("word/styles.xml", &b"<w:styles/>"[..], CompressionMethod::Deflated),
        ]);
        DocumentStore::from_bytes(bytes).unwrap()
    }

    fn read_entries(bytes: Vec<u8>) -> Vec<(String, Vec<u8>, CompressionMethod)> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (entry.name().to_string(), data, entry.compression())
            })
            .collect()
    }

    #[test]
    fn test_classify() {
        assert_eq!(PartKind::classify("word/document.xml"), Some(PartKind::MainDocument));
        assert_eq!(PartKind::classify("word/header.xml"), Some(PartKind::Header));
        assert_eq!(PartKind::classify("word/header12.xml"), Some(PartKind::Header));
        assert_eq!(PartKind::classify("word/footer3.xml"), Some(PartKind::Footer));
        assert_eq!(PartKind::classify("word/media/a.jpeg"), Some(PartKind::Media));
        assert_eq!(PartKind::classify("word/media/"), None);
        assert_eq!(PartKind::classify("word/_rels/header1.xml.rels"), None);
        assert_eq!(PartKind::classify("word/headerA.xml"), None);
        assert_eq!(PartKind::classify("word/styles.xml"), None);
        assert_eq!(PartKind::classify("xword/document.xml"), None);
    }

    #[test]
    fn test_loads_only_mutable_parts() {
        let store = setup();
        let names: Vec<_> = store.part_names().collect();

        assert_eq!(
            names,
            vec![MAIN_DOCUMENT, "word/header1.xml", "word/footer.xml", "word/media/image1.png"]
        );
        assert_eq!(store.get("word/header1.xml"), Some(&b"<w:hdr/>"[..]));
        assert_eq!(store.get("word/styles.xml"), None);
    }

    #[test]
    fn test_missing_main_document() {
        let bytes = build(&[("word/header1.xml", &b"<w:hdr/>"[..], CompressionMethod::Deflated)]);
        let err = DocumentStore::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, TemplateError::MissingMainPart(_)));
    }

    #[test]
    fn test_not_a_zip() {
        let err = DocumentStore::from_bytes(b"plain text".to_vec()).unwrap_err();
        assert!(matches!(err, TemplateError::Archive(_)));
    }

    #[test]
    fn test_set_unregistered_part() {
        let mut store = setup();
        let err = store.set("word/styles.xml", b"x".to_vec()).unwrap_err();

        assert!(matches!(err, TemplateError::UnregisteredPart(ref name) if name == "word/styles.xml"));
        assert!(store.parts().all(|part| !part.is_modified()));
    }

    #[test]
    fn test_finalize_preserves_order_and_untouched_entries() {
        let mut store = setup();
        store.set("word/header1.xml", b"<w:hdr>new</w:hdr>".to_vec()).unwrap();
        store.set("word/media/image1.png", b"\x89PNG2".to_vec()).unwrap();

        let out = store.finalize(Cursor::new(Vec::new())).unwrap().into_inner();
        let entries = read_entries(out);

        let names: Vec<_> = entries.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "[Content_Types].xml",
                MAIN_DOCUMENT,
                "word/header1.xml",
                "word/footer.xml",
                "word/media/image1.png",
                "word/styles.xml"
            ]
        );
        assert_eq!(entries[2].1, b"<w:hdr>new</w:hdr>");
        assert_eq!(entries[4].1, b"\x89PNG2");
        assert_eq!(entries[4].2, CompressionMethod::Stored);
        assert_eq!(entries[5].1, b"<w:styles/>");
        assert_eq!(entries[1].1, b"<w:document/>");
    }
}
