//! Error types for the hoist store

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while staging or transferring blobs
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem or transfer I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The manifest could not be parsed
    #[error(transparent)]
    Manifest(#[from] hoist_core::ManifestError),

    /// The URI scheme is not handled by this store
    #[error("unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    /// The referenced object does not exist
    #[error("object not found: {0}")]
    NotFound(String),

    /// A staging task could not be joined
    #[error("staging task failed: {0}")]
    TaskFailed(String),
}
