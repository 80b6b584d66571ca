//! Backend-agnostic run specification
//!
//! A [`RunSpec`] is the complete description of one execution: the
//! environment, the staged continuation and the resolved image. Backends
//! consume it without knowing how it was staged.

use crate::environment::{EnvironmentBase, RunEnvironment};
use crate::manifest::RunManifest;
use serde::{Deserialize, Serialize};

/// A manifest that has been uploaded to the staging location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedContinuation {
    manifest_location: String,
    manifest: RunManifest,
}

impl StagedContinuation {
    pub fn new(manifest_location: impl Into<String>, manifest: RunManifest) -> Self {
        Self {
            manifest_location: manifest_location.into(),
            manifest,
        }
    }

    /// URI of the uploaded manifest, blob storage or local path
    pub fn manifest_location(&self) -> &str {
        &self.manifest_location
    }

    pub fn manifest(&self) -> &RunManifest {
        &self.manifest
    }
}

/// An optional sidecar container that collects logs next to the workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSidecar {
    pub image: String,
    pub args: Vec<String>,
}

impl LoggingSidecar {
    pub fn new(image: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            image: image.into(),
            args,
        }
    }
}

/// The complete description of one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    environment: RunEnvironment,
    staged_continuation: StagedContinuation,
    /// Resolved image, when the environment determines one up front.
    /// `None` only for a template base with no override; the backend then
    /// reports the missing or conflicting image declaration when it builds
    /// the workload.
    image: Option<String>,
    logging_sidecar: Option<LoggingSidecar>,
}

impl RunSpec {
    /// Builds a run spec, resolving the image from the environment
    ///
    /// An image base resolves to its image, or to the override if one was
    /// set. A template base resolves to the override alone; without one the
    /// image stays unresolved until workload-build time.
    pub fn from_environment(
        environment: RunEnvironment,
        staged_continuation: StagedContinuation,
    ) -> Self {
        let image = match environment.base() {
            EnvironmentBase::Image(image) => Some(
                environment
                    .image_override()
                    .unwrap_or(image.as_str())
                    .to_string(),
            ),
            EnvironmentBase::Template(_) => environment.image_override().map(str::to_string),
        };
        Self {
            environment,
            staged_continuation,
            image,
            logging_sidecar: None,
        }
    }

    pub fn with_logging_sidecar(mut self, sidecar: LoggingSidecar) -> Self {
        self.logging_sidecar = Some(sidecar);
        self
    }

    pub fn environment(&self) -> &RunEnvironment {
        &self.environment
    }

    pub fn staged_continuation(&self) -> &StagedContinuation {
        &self.staged_continuation
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn logging_sidecar(&self) -> Option<&LoggingSidecar> {
        self.logging_sidecar.as_ref()
    }
}

/// Completes an image name without an explicit tag with `:latest`
pub fn ensure_tag(image: &str) -> String {
    if image.contains(':') {
        image.to_string()
    } else {
        format!("{image}:latest")
    }
}
