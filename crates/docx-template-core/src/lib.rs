//! Placeholder substitution for DOCX templates.
//!
//! Word editors freely split what reads as one word across several runs
//! (`<w:r>` elements), so `{{.name}}` in the editor may be stored as `{{.na`
//! in one run and `me}}` in the next. This crate reads the run structure of
//! the mutable parts of a `.docx` archive, finds placeholders across those
//! run boundaries, and splices rendered values back into the raw XML:
//! - `Document`: open, substitute, inspect and write a template
//! - `Evaluator` / `PathEvaluator`: resolve `{{expr}}` against a context
//! - `PlaceholderMap`: flat lookup for `{key}` placeholders
//! - `ReplaceObserver`: per-placeholder callbacks (`TracingObserver` logs them)
//!
//! Placeholders that cannot be resolved are left exactly as written.

pub mod document;
pub mod entities;
pub mod error;
pub mod evaluator;
pub mod placeholder;
pub mod replacer;
pub mod run;
pub mod span;
pub mod store;

pub use document::{
    complete_replace_all, complete_replace_all_from_bytes, complete_template,
    complete_template_from_bytes, complete_template_to_bytes, default_output_path, Document,
    PartPlaceholders,
};
pub use error::{ParseError, Result, TemplateError};
pub use evaluator::{
    ContextResolver, EvalError, Evaluator, FunctionTable, PathEvaluator, PlaceholderMap,
    Resolution, Resolver, TemplateFn,
};
pub use placeholder::{locate_placeholders, Fragment, Placeholder, PlaceholderLocator, Syntax};
pub use replacer::{
    NoopObserver, ReplaceObserver, ReplaceReport, ReplacementEngine, SkipReason, TracingObserver,
    NO_VALUE,
};
pub use run::{parse_runs, Run, RunParser, Runs};
pub use span::{Span, TagPair};
pub use store::{DocumentStore, Part, PartKind, MAIN_DOCUMENT};
