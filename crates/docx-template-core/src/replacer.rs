//! Splicing resolved placeholders into part bytes.

use std::ops::AddAssign;

use serde::Serialize;
use tracing::debug;

use crate::entities::escape_text;
use crate::error::{Result, TemplateError};
use crate::evaluator::{EvalError, Resolution, Resolver};
use crate::placeholder::Placeholder;

/// Rendered output containing this marks a field the evaluator could not
/// resolve.
pub const NO_VALUE: &str = "<no value>";

/// Why a placeholder was left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    MissingField(String),
    NoValue,
}

/// Receives one callback per processed placeholder. Both methods default to
/// doing nothing.
pub trait ReplaceObserver {
    fn substituted(&self, _part: &str, _placeholder: &Placeholder, _rendered: &str) {}

    fn skipped(&self, _part: &str, _placeholder: &Placeholder, _reason: &SkipReason) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ReplaceObserver for NoopObserver {}

/// Forwards every decision to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ReplaceObserver for TracingObserver {
    fn substituted(&self, part: &str, placeholder: &Placeholder, rendered: &str) {
        debug!(
            "Replacing {} in {} (bytes {}..{}) with {:?}",
            placeholder.token,
            part,
            placeholder.start_pos(),
            placeholder.end_pos(),
            rendered
        );
    }

    fn skipped(&self, part: &str, placeholder: &Placeholder, reason: &SkipReason) {
        debug!("Skipping {} in {}: {:?}", placeholder.token, part, reason);
    }
}

/// Counts of substituted and skipped placeholders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaceReport {
    pub substituted: usize,
    pub skipped: usize,
}

impl AddAssign for ReplaceReport {
    fn add_assign(&mut self, other: Self) {
        self.substituted += other.substituted;
        self.skipped += other.skipped;
    }
}

/// Applies resolved placeholders to one part's bytes.
///
/// Placeholders are processed from the highest start offset down, so every
/// splice leaves the recorded offsets of the remaining ones valid.
pub struct ReplacementEngine<'o> {
    observer: &'o dyn ReplaceObserver,
}

impl Default for ReplacementEngine<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplacementEngine<'static> {
    pub fn new() -> Self {
        Self {
            observer: &NoopObserver,
        }
    }
}

impl std::fmt::Debug for ReplacementEngine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplacementEngine").finish_non_exhaustive()
    }
}

impl<'o> ReplacementEngine<'o> {
    pub fn with_observer(observer: &'o dyn ReplaceObserver) -> Self {
        Self { observer }
    }

    /// Resolve and splice `placeholders`, which must have been located in
    /// `bytes`. An unresolved placeholder keeps its original bytes; an
    /// expression the resolver rejects as broken aborts the pass.
    pub fn replace(
        &self,
        part: &str,
        bytes: &mut Vec<u8>,
        mut placeholders: Vec<Placeholder>,
        resolver: &dyn Resolver,
    ) -> Result<ReplaceReport> {
        placeholders.sort_by(|a, b| b.start_pos().cmp(&a.start_pos()));

        let mut report = ReplaceReport::default();
        for placeholder in &placeholders {
            let skip = match resolver.resolve(placeholder) {
                Ok(Resolution::Found(rendered)) if rendered.contains(NO_VALUE) => SkipReason::NoValue,
                Ok(Resolution::Found(rendered)) => {
                    let span = placeholder.span();
                    debug_assert!(span.end <= bytes.len());

                    let escaped = escape_text(&rendered);
                    bytes.splice(span.range(), escaped.bytes());
                    self.observer.substituted(part, placeholder, &rendered);
                    report.substituted += 1;
                    continue;
                }
                Ok(Resolution::NotFound) => SkipReason::NotFound,
                Err(EvalError::MissingField(field)) => SkipReason::MissingField(field),
                Err(err) => {
                    return Err(TemplateError::Evaluation {
                        expression: placeholder.token.clone(),
                        reason: err.to_string(),
                    })
                }
            };

            self.observer.skipped(part, placeholder, &skip);
            report.skipped += 1;
        }

        Ok(report)
    }
}
