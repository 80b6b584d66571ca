//! Error types for the hoist submitter

use hoist_runner::RunnerError;
use hoist_store::StoreError;
use thiserror::Error;

/// Result type alias for submitter operations
pub type Result<T> = std::result::Result<T, SubmitError>;

/// Errors that can occur over the lifetime of one submission
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Staging the continuation or its dependencies failed
    #[error("staging failed: {0}")]
    Staging(#[from] StoreError),

    /// The execution backend failed to run the workload
    #[error("submission failed: {0}")]
    Submission(#[from] RunnerError),

    /// The workload finished without producing a result location
    #[error("run completed without producing a result")]
    NoResult,

    /// The workload produced a result location that could not be fetched
    #[error("failed to download result from {uri}: {source}")]
    ResultDownload {
        uri: String,
        #[source]
        source: StoreError,
    },
}
