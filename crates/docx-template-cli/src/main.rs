//! Command line front end for docx-template-core.
//!
//! - `render`: fill `{{expr}}` placeholders from a JSON context
//! - `replace`: fill `{key}` placeholders from a flat JSON object
//! - `inspect`: list placeholders per part as JSON

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use docx_template_core::{
    default_output_path, Document, PathEvaluator, PlaceholderMap, ReplaceReport, Syntax,
    TracingObserver,
};
use serde_json::{json, Value};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;

use config::{Command, Config, OutputArgs};

fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.verbose);

    debug!("docx-template v{}", env!("CARGO_PKG_VERSION"));

    match config.command {
        Command::Render {
            template,
            data,
            output,
        } => {
            let context = read_json(&data)?;
            let mut document = open(&template)?;
            let report = document
                .execute_template(&PathEvaluator::new(), Some(&context))
                .with_context(|| format!("Failed to render {}", template.display()))?;
            finish(document, &template, output, report)
        }
        Command::Replace {
            template,
            map,
            output,
        } => {
            let map = read_map(&map)?;
            let mut document = open(&template)?;
            let report = document
                .replace_all(&map)
                .with_context(|| format!("Failed to replace placeholders in {}", template.display()))?;
            finish(document, &template, output, report)
        }
        Command::Inspect { template, map } => {
            let document = open(&template)?;
            let expressions = document.placeholders(Syntax::Expression)?;
            let simple = document.placeholders(Syntax::Simple)?;
            let missing = match map {
                Some(path) => Some(document.missing_keys(&read_map(&path)?)?),
                None => None,
            };

            let summary = json!({
                "template": template,
                "expression": expressions,
                "simple": simple,
                "missing_keys": missing,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

/// `DOCX_TEMPLATE_LOG`, then `RUST_LOG`, then `info` (`debug` with --verbose).
/// Logs go to stderr so `inspect` output stays parseable.
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("DOCX_TEMPLATE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open(template: &Path) -> Result<Document> {
    let document = Document::open(template)
        .with_context(|| format!("Failed to open template {}", template.display()))?;
    Ok(document.with_observer(TracingObserver))
}

fn finish(mut document: Document, template: &Path, output: OutputArgs, report: ReplaceReport) -> Result<()> {
    for media in &output.media {
        let bytes = fs::read(&media.path)
            .with_context(|| format!("Failed to read media file {}", media.path.display()))?;
        document
            .set_file(&media.part, bytes)
            .with_context(|| format!("Template has no part {}", media.part))?;
    }

    let path = output.output.unwrap_or_else(|| default_output_path(template));
    document
        .write_to_file(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(
        "Wrote {} ({} substituted, {} left as is)",
        path.display(),
        report.substituted,
        report.skipped
    );
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// A JSON object whose scalar values become replacement text.
fn read_map(path: &Path) -> Result<PlaceholderMap> {
    let Value::Object(entries) = read_json(path)? else {
        bail!("{} must contain a JSON object", path.display());
    };

    let mut map = PlaceholderMap::with_capacity(entries.len());
    for (key, value) in entries {
        let text = match value {
            Value::String(s) => s,
            Value::Number(_) | Value::Bool(_) => value.to_string(),
            Value::Null => continue,
            Value::Array(_) | Value::Object(_) => {
                bail!("Value for '{}' in {} is not a scalar", key, path.display())
            }
        };
        map.insert(key, text);
    }
    Ok(map)
}
