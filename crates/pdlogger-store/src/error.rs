//! Error types for pdlogger-store.

use std::path::PathBuf;

/// Result type for pdlogger-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pdlogger-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested segment does not exist.
    #[error("Log segment not found: {0}")]
    NotFound(String),

    /// The identifier escapes the log namespace.
    #[error("Identifier outside log namespace: {0}")]
    Forbidden(String),

    /// Failed to create the log directory.
    #[error("Failed to create log directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Bulk clear left segments behind.
    #[error("Failed to clear {failed} log segment(s)")]
    ClearFailed { failed: usize },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
