//! Volume request and mount types
//!
//! A [`VolumeRequest`] asks the volume claim repository for a storage claim;
//! a [`VolumeMount`] binds a request into a workload at a mount path. Two
//! requests are the same claim iff their ids are equal, which is what the
//! repository keys its cache on.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

const CLAIM_PREFIX: &str = "hoist-claim-";

/// How a volume request is satisfied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimSpec {
    /// Provision a new claim from a storage class
    New {
        storage_class: String,
        size: String,
        /// Adopt an already-provisioned claim with the request's id if one
        /// exists, instead of failing or double-creating
        create_if_not_exists: bool,
    },
    /// Use an already-provisioned claim by name; absence is fatal
    Existing { claim_name: String },
}

/// A request for a storage claim backing one or more volume mounts
///
/// Identity is the `id` alone: requests with equal ids map to the same live
/// claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRequest {
    id: String,
    keep_on_exit: bool,
    spec: ClaimSpec,
}

impl VolumeRequest {
    /// A throwaway claim, deleted when the repository closes
    pub fn ephemeral(storage_class: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            id: format!("{}{}", CLAIM_PREFIX, short_id()),
            keep_on_exit: false,
            spec: ClaimSpec::New {
                storage_class: storage_class.into(),
                size: size.into(),
                create_if_not_exists: false,
            },
        }
    }

    /// A reusable claim with a deterministic id derived from name, storage
    /// class and size; adopted if it already exists and kept on exit
    ///
    /// The id doubles as the claim's API resource name, so it is collapsed
    /// into a DNS-1123 label (size literals like `16Gi` carry uppercase).
    pub fn create_if_not_exists(
        name: impl Into<String>,
        storage_class: impl Into<String>,
        size: impl Into<String>,
    ) -> Self {
        let storage_class = storage_class.into();
        let size = size.into();
        Self {
            id: dns_label(&format!("{}-{}-{}", name.into(), storage_class, size)),
            keep_on_exit: true,
            spec: ClaimSpec::New {
                storage_class,
                size,
                create_if_not_exists: true,
            },
        }
    }

    /// A claim provisioned outside of hoist; never created, never deleted
    pub fn existing_claim(claim_name: impl Into<String>) -> Self {
        let claim_name = claim_name.into();
        Self {
            id: claim_name.clone(),
            keep_on_exit: true,
            spec: ClaimSpec::Existing { claim_name },
        }
    }

    /// Derives a copy of this request that survives repository teardown
    pub fn keep_on_exit(mut self) -> Self {
        self.keep_on_exit = true;
        self
    }

    /// Mounts the requested volume read-only at the given path
    pub fn mount_read_only(&self, mount_path: impl Into<String>) -> VolumeMount {
        VolumeMount::new(self.clone(), mount_path, true)
    }

    /// Mounts the requested volume read-write at the given path
    pub fn mount_read_write(&self, mount_path: impl Into<String>) -> VolumeMount {
        VolumeMount::new(self.clone(), mount_path, false)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn keep(&self) -> bool {
        self.keep_on_exit
    }

    pub fn spec(&self) -> &ClaimSpec {
        &self.spec
    }
}

impl PartialEq for VolumeRequest {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for VolumeRequest {}

impl Hash for VolumeRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A binding of a [`VolumeRequest`] into a workload at a mount path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    request: VolumeRequest,
    mount_path: String,
    read_only: bool,
}

impl VolumeMount {
    pub fn new(request: VolumeRequest, mount_path: impl Into<String>, read_only: bool) -> Self {
        Self {
            request,
            mount_path: mount_path.into(),
            read_only,
        }
    }

    pub fn request(&self) -> &VolumeRequest {
        &self.request
    }

    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Collapses a raw id into a DNS-1123 label: lowercase alphanumerics and
/// dashes, at most 63 characters, no leading or trailing dash
fn dns_label(raw: &str) -> String {
    let mut label: String = raw
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    label.truncate(63);
    label.trim_matches('-').to_string()
}
