//! Hoist Runner
//!
//! Execution backends for the hoist remote execution system.
//!
//! A backend turns a [`hoist_core::RunSpec`] into a running workload, blocks
//! until it reaches a terminal state, and extracts the result location from
//! the workload's termination message. Two implementations share the
//! [`ExecutionBackend`] contract:
//! - [`kube::KubeBackend`] submits pods to a Kubernetes cluster and polls
//!   their phase, retrying the submission step with exponential backoff
//! - [`local::LocalBackend`] runs containers against a local Docker daemon,
//!   emulating the termination log with a host-bound temp file
//!
//! The [`kube::VolumeClaimRepository`] maps volume requests to live
//! persistent volume claims and tears down the ephemeral ones on close.

pub mod backend;
pub mod config;
pub mod error;
pub mod kube;
pub mod local;

pub use backend::ExecutionBackend;
pub use config::RunnerConfig;
pub use error::RunnerError;
