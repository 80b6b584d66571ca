//! Run environment model
//!
//! An immutable description of where and how a continuation runs: a base
//! image (or a pod template document), secret mounts, volume mounts and
//! resource requests. All derivation methods take the value and return a
//! modified copy.

use crate::volume::VolumeMount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What the workload specification is built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentBase {
    /// A minimal default workload built from only an image name
    Image(String),
    /// A pod template document on local disk; must contain exactly one
    /// container with the well-known run-container name
    Template(PathBuf),
}

/// A secret volume mounted read-only into the workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    name: String,
    mount_path: String,
}

impl Secret {
    pub fn new(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }
}

/// A named resource request, e.g. cpu or memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    resource: String,
    amount: String,
}

impl ResourceRequest {
    pub fn new(resource: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            amount: amount.into(),
        }
    }

    pub fn cpu(cores: u32) -> Self {
        Self::new("cpu", cores.to_string())
    }

    pub fn memory(amount: impl Into<String>) -> Self {
        Self::new("memory", amount)
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn amount(&self) -> &str {
        &self.amount
    }
}

/// Immutable description of a job's runtime environment
///
/// Derivations return a new value; the original is never modified:
///
/// ```
/// use hoist_core::environment::{ResourceRequest, RunEnvironment, Secret};
///
/// let env = RunEnvironment::with_image("python:3.12")
///     .with_secret(Secret::new("gcp-key", "/etc/keys"))
///     .with_resource_request(ResourceRequest::cpu(4))
///     .with_request("memory", "16Gi");
/// assert_eq!(env.resource_requests().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEnvironment {
    base: EnvironmentBase,
    image_override: Option<String>,
    secret_mounts: Vec<Secret>,
    volume_mounts: Vec<VolumeMount>,
    resource_requests: BTreeMap<String, String>,
}

impl RunEnvironment {
    /// An environment built from only an image name
    pub fn with_image(image: impl Into<String>) -> Self {
        Self::from_base(EnvironmentBase::Image(image.into()))
    }

    /// An environment built from a pod template document
    pub fn from_template(path: impl Into<PathBuf>) -> Self {
        Self::from_base(EnvironmentBase::Template(path.into()))
    }

    fn from_base(base: EnvironmentBase) -> Self {
        Self {
            base,
            image_override: None,
            secret_mounts: Vec::new(),
            volume_mounts: Vec::new(),
            resource_requests: BTreeMap::new(),
        }
    }

    /// Adds a secret mount; secrets are identified by name, adding a secret
    /// with an existing name replaces the previous mount
    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.secret_mounts.retain(|s| s.name() != secret.name());
        self.secret_mounts.push(secret);
        self
    }

    /// Appends a volume mount
    pub fn with_mount(mut self, mount: VolumeMount) -> Self {
        self.volume_mounts.push(mount);
        self
    }

    /// Sets a resource request; last write wins per resource name
    pub fn with_request(mut self, resource: impl Into<String>, amount: impl Into<String>) -> Self {
        self.resource_requests.insert(resource.into(), amount.into());
        self
    }

    pub fn with_resource_request(self, request: ResourceRequest) -> Self {
        let ResourceRequest { resource, amount } = request;
        self.with_request(resource, amount)
    }

    /// Overrides the image
    ///
    /// On an [`EnvironmentBase::Image`] base this replaces the image. On a
    /// [`EnvironmentBase::Template`] base it records a pending override that
    /// the backend applies when the workload specification is built; whether
    /// the template may itself declare an image is checked there, not here,
    /// so an environment can be freely derived before an image is chosen.
    pub fn with_image_override(mut self, image: impl Into<String>) -> Self {
        self.image_override = Some(image.into());
        self
    }

    pub fn base(&self) -> &EnvironmentBase {
        &self.base
    }

    pub fn image_override(&self) -> Option<&str> {
        self.image_override.as_deref()
    }

    pub fn secret_mounts(&self) -> &[Secret] {
        &self.secret_mounts
    }

    pub fn volume_mounts(&self) -> &[VolumeMount] {
        &self.volume_mounts
    }

    pub fn resource_requests(&self) -> &BTreeMap<String, String> {
        &self.resource_requests
    }

    /// Whether any mount in this environment is read-write
    pub fn has_read_write_mount(&self) -> bool {
        self.volume_mounts.iter().any(|m| !m.read_only())
    }

    /// The template path, when the base is a template
    pub fn template_path(&self) -> Option<&Path> {
        match &self.base {
            EnvironmentBase::Template(path) => Some(path),
            EnvironmentBase::Image(_) => None,
        }
    }
}
