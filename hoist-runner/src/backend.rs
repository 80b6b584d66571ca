//! Execution backend contract

use crate::error::Result;
use async_trait::async_trait;
use hoist_core::RunSpec;

/// Turns a run spec into a running workload and blocks until it completes
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Runs one workload to a terminal state
    ///
    /// Returns `Ok(Some(uri))` when the workload succeeded and wrote a
    /// result location to its termination side-channel. Returns `Ok(None)`
    /// both when the workload failed and when it succeeded without writing
    /// a termination message: side-effect-only workloads are legitimate,
    /// so the absent message is not an error.
    async fn run(&self, spec: &RunSpec) -> Result<Option<String>>;

    /// Whether runs on this backend attach cluster volumes
    ///
    /// The submitter uses this to decide if a detach grace period applies
    /// after runs with read-write volume mounts.
    fn attaches_volumes(&self) -> bool {
        false
    }
}
