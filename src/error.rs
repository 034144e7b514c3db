//! Centralized error types for mailindex.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailindex library.
#[derive(Error, Debug)]
pub enum MailIndexError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The bulk source could not be opened or read. Fatal for an ingestion run.
    #[error("Source '{path}' is unreadable: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    /// A source row failed schema validation (missing id, empty message, duplicate id).
    #[error("Invalid source row at line {line}: {reason}")]
    SourceRowInvalid { line: u64, reason: String },

    /// A source row exceeded the configured size ceiling and was not parsed.
    #[error("Record at line {line} is {size} bytes, over the {limit} byte ceiling")]
    RecordTooLarge { line: u64, size: u64, limit: u64 },

    /// A batch transaction failed and was rolled back.
    #[error("Batch {batch} rolled back ({documents} document(s) lost): {reason}")]
    BatchWriteFailed {
        batch: u64,
        documents: usize,
        reason: String,
    },

    /// The index engine reported an error.
    #[error("Index error: {0}")]
    Index(#[from] sqlx::Error),

    /// A stored run log entry could not be encoded or decoded.
    #[error("Run log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The configuration contains an invalid value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, MailIndexError>`.
pub type Result<T> = std::result::Result<T, MailIndexError>;

impl MailIndexError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `SourceUnreadable` variant from a path and an `io::Error`.
    pub fn unreadable(path: impl Into<PathBuf>, source: &std::io::Error) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            reason: source.to_string(),
        }
    }
}

impl From<std::io::Error> for MailIndexError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
