//! Hoist Core
//!
//! Core types and abstractions for the hoist remote execution system.
//!
//! This crate contains:
//! - The run manifest and its text codec (which files make up one run)
//! - The run environment model (image or pod template, secrets, volumes,
//!   resource requests)
//! - Volume request/mount types shared by the submitter and the backends
//! - The backend-agnostic run spec

pub mod environment;
pub mod manifest;
pub mod run_spec;
pub mod volume;

pub use environment::{EnvironmentBase, ResourceRequest, RunEnvironment, Secret};
pub use manifest::{ManifestError, RunManifest};
pub use run_spec::{LoggingSidecar, RunSpec, StagedContinuation, ensure_tag};
pub use volume::{ClaimSpec, VolumeMount, VolumeRequest};
