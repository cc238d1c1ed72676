use std::path::PathBuf;

/// Errors surfaced by document operations.
///
/// Unresolved placeholders are not errors: they are skipped and left as
/// literal text, so nothing here is produced for a missing key.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Unable to read docx archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Invalid docx archive, {0} is missing")]
    MissingMainPart(String),

    #[error("Malformed XML in {part}: {source}")]
    Parse {
        part: String,
        #[source]
        source: ParseError,
    },

    #[error("Unregistered part {0}")]
    UnregisteredPart(String),

    #[error("Failed to {operation} {}: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write into {} while it is open as the template", .0.display())]
    SelfOverwrite(PathBuf),

    #[error("Template {} is already opened by another document", .0.display())]
    Locked(PathBuf),

    #[error("Failed to evaluate '{expression}': {reason}")]
    Evaluation { expression: String, reason: String },
}

impl TemplateError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, TemplateError>;

/// A part that could not be read as an XML document.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("part is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error(transparent)]
    Xml(#[from] roxmltree::Error),
}
