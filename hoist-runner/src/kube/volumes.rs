//! Volume claim repository
//!
//! Maps [`VolumeRequest`]s to live persistent volume claims. Each request id
//! is resolved at most once per repository; concurrent submissions that
//! mount the same request share a single resolution, and [`close`] deletes
//! the claims that are not marked keep-on-exit.
//!
//! [`close`]: VolumeClaimRepository::close

use crate::error::{Result, RunnerError};
use crate::kube::client::ClusterClient;
use crate::kube::pod::{Metadata, Resources, VolumeClaim, VolumeClaimSpec};
use hoist_core::{ClaimSpec, VolumeRequest};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

const STORAGE_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";
const ACCESS_MODES: [&str; 2] = ["ReadWriteOnce", "ReadOnlyMany"];

#[derive(Debug, Clone)]
struct TrackedClaim {
    claim: VolumeClaim,
    keep: bool,
}

/// Per-submitter cache of resolved volume claims
pub struct VolumeClaimRepository {
    client: Arc<dyn ClusterClient>,
    claims: Mutex<HashMap<String, Arc<OnceCell<TrackedClaim>>>>,
}

impl VolumeClaimRepository {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            claims: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a request to a live claim, creating one if needed
    ///
    /// Resolution is single-flight per request id: the first caller performs
    /// the lookup or creation, everyone else waits for that result. A failed
    /// resolution is not cached and the next caller retries it.
    pub async fn get_claim(&self, request: &VolumeRequest) -> Result<VolumeClaim> {
        let cell = {
            let mut claims = self.claims.lock().await;
            claims.entry(request.id().to_string()).or_default().clone()
        };

        let tracked = cell.get_or_try_init(|| self.resolve(request)).await?;
        Ok(tracked.claim.clone())
    }

    async fn resolve(&self, request: &VolumeRequest) -> Result<TrackedClaim> {
        match request.spec() {
            ClaimSpec::Existing { claim_name } => {
                let claim = self
                    .client
                    .get_claim(claim_name)
                    .await?
                    .ok_or_else(|| RunnerError::ClaimNotFound(claim_name.clone()))?;
                Ok(TrackedClaim { claim, keep: true })
            }
            ClaimSpec::New {
                storage_class,
                size,
                create_if_not_exists,
            } => {
                if *create_if_not_exists {
                    if let Some(existing) = self.client.get_claim(request.id()).await? {
                        debug!("Adopting existing volume claim {}", request.id());
                        return Ok(TrackedClaim {
                            claim: existing,
                            keep: request.keep(),
                        });
                    }
                }

                let claim = build_claim(request.id(), storage_class, size);
                let created = self.client.create_claim(&claim).await?;
                info!(
                    "Created volume claim {} ({}, {})",
                    request.id(),
                    storage_class,
                    size
                );
                Ok(TrackedClaim {
                    claim: created,
                    keep: request.keep(),
                })
            }
        }
    }

    /// Deletes every resolved claim not marked keep-on-exit
    ///
    /// Deletion failures are logged, not propagated: teardown should never
    /// mask the run's outcome. The repository is empty afterwards, so
    /// closing twice is harmless.
    pub async fn close(&self) {
        let entries: Vec<(String, Arc<OnceCell<TrackedClaim>>)> =
            self.claims.lock().await.drain().collect();

        for (id, cell) in entries {
            let Some(tracked) = cell.get() else {
                continue;
            };
            if tracked.keep {
                debug!("Keeping volume claim {}", id);
                continue;
            }
            let name = tracked
                .claim
                .metadata
                .name
                .clone()
                .unwrap_or_else(|| id.clone());
            match self.client.delete_claim(&name).await {
                Ok(()) => info!("Deleted volume claim {}", name),
                Err(e) => warn!("Failed to delete volume claim {}: {}", name, e),
            }
        }
    }
}

fn build_claim(name: &str, storage_class: &str, size: &str) -> VolumeClaim {
    let mut annotations = std::collections::BTreeMap::new();
    annotations.insert(
        STORAGE_CLASS_ANNOTATION.to_string(),
        storage_class.to_string(),
    );

    let mut requests = std::collections::BTreeMap::new();
    requests.insert("storage".to_string(), size.to_string());

    VolumeClaim {
        api_version: Some("v1".to_string()),
        kind: Some("PersistentVolumeClaim".to_string()),
        metadata: Metadata {
            name: Some(name.to_string()),
            annotations,
        },
        spec: VolumeClaimSpec {
            access_modes: ACCESS_MODES.iter().map(|m| m.to_string()).collect(),
            resources: Resources {
                requests,
                limits: Default::default(),
            },
        },
    }
}
