//! Custom error types for the ifdwalk crate.

use thiserror::Error;

use super::models::{BadOffset, WarningKind};
use super::value::Format;

/// The primary error type for all operations in this crate.
///
/// Most of these never escape a walk: the walker converts them into
/// [`Warning`](super::models::Warning)s and keeps going. Only an I/O failure on
/// the very first top-level read is returned to the caller.
#[derive(Debug, Error)]
pub enum MetaError {
    /// An error originating from I/O operations on the backing source.
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    /// A directory header or size is inconsistent with the available bytes.
    #[error("Bad directory {directory}: {reason}")]
    BadDirectory { directory: String, reason: String },

    /// A resolved pointer lies outside the source or overlaps its own directory.
    #[error("{0}")]
    BadOffset(BadOffset),

    /// A primitive value could not be decoded with its declared format and count.
    #[error("Cannot decode {count} x {}: {reason}", .format.map(|f| f.to_string()).unwrap_or_else(|| "?".to_string()))]
    Decode {
        format: Option<Format>,
        count: u64,
        reason: String,
    },

    /// A composite tag has a cycle or a permanently missing required dependency.
    #[error("Unresolvable composite {name}: {reason}")]
    UnresolvableComposite { name: String, reason: String },

    /// A base/start expression in a subdirectory rule failed to parse or evaluate.
    #[error("Invalid offset expression {expr:?}: {reason}")]
    BadExpression { expr: String, reason: String },

    /// A subdirectory rule names a table that is not in the catalog.
    #[error("Unknown tag table: {0}")]
    UnknownTable(String),
}

impl MetaError {
    /// The warning category this error is reported under.
    pub fn kind(&self) -> WarningKind {
        match self {
            MetaError::Io(_) => WarningKind::Io,
            MetaError::BadDirectory { .. } | MetaError::UnknownTable(_) => WarningKind::BadDirectory,
            MetaError::BadOffset(_) => WarningKind::BadOffset,
            MetaError::Decode { .. } | MetaError::BadExpression { .. } => WarningKind::Decode,
            MetaError::UnresolvableComposite { .. } => WarningKind::UnresolvableComposite,
        }
    }
}

/// A convenience `Result` type alias using the crate's `MetaError` type.
pub type Result<T> = std::result::Result<T, MetaError>;
