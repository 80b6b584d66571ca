//! Error types for the hoist runner

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can occur while running a workload
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A cluster API call failed
    #[error("cluster request failed: {0}")]
    Cluster(#[from] crate::kube::client::ClusterError),

    /// Workload submission kept failing through the whole backoff budget
    #[error("submission failed after {attempts} attempt(s): {source}")]
    SubmitExhausted {
        attempts: u32,
        #[source]
        source: crate::kube::client::ClusterError,
    },

    /// A referenced existing volume claim does not exist
    #[error("requested claim '{0}' not found")]
    ClaimNotFound(String),

    /// The workload did not reach a terminal state within the poll timeout
    #[error("workload '{name}' did not reach a terminal state within {timeout:?}")]
    PollTimeout { name: String, timeout: Duration },

    /// A pod template document could not be read or parsed
    #[error("unreadable pod template {path}: {reason}")]
    MalformedTemplate { path: PathBuf, reason: String },

    /// A pod template does not contain exactly one run container
    #[error("pod template {path} must contain exactly one '{container}' container")]
    MissingRunContainer { path: PathBuf, container: &'static str },

    /// A pod template declares an image and no override was supplied
    #[error("pod template {path} already declares an image and no override was supplied")]
    ImageConflict { path: PathBuf },

    /// No image could be resolved for the workload
    #[error("no image declared for the workload; set one on the environment")]
    MissingImage,

    /// The local container runtime reported a failure
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// Local filesystem I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
