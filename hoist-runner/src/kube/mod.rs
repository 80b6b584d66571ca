//! Kubernetes execution backend
//!
//! Submits one pod per run, polls its phase until it is terminal, and reads
//! the result location from the run container's termination message.
//! Submission retries transient cluster errors with exponential backoff;
//! polling is bounded by the configured poll timeout.

pub mod client;
pub mod pod;
pub mod volumes;

pub use client::{ClusterClient, HttpClusterClient};
pub use volumes::VolumeClaimRepository;

use crate::backend::ExecutionBackend;
use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use async_trait::async_trait;
use hoist_core::RunSpec;
use pod::{Pod, PodPhase, build_pod, termination_message};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Kubernetes-backed [`ExecutionBackend`]
pub struct KubeBackend {
    client: Arc<dyn ClusterClient>,
    claims: Arc<VolumeClaimRepository>,
    config: RunnerConfig,
}

impl KubeBackend {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        claims: Arc<VolumeClaimRepository>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            client,
            claims,
            config,
        }
    }

    /// Creates the pod, retrying transient failures with doubling backoff
    async fn submit(&self, pod: &Pod, name: &str) -> Result<()> {
        let mut attempt = 1;
        let mut delay = self.config.submit_backoff_base;

        loop {
            match self.client.create_pod(pod).await {
                Ok(_) => {
                    info!("Submitted pod {}", name);
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.config.submit_max_attempts => {
                    warn!(
                        "Pod {} submission attempt {}/{} failed, retrying in {:?}: {}",
                        name, attempt, self.config.submit_max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(RunnerError::SubmitExhausted {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Polls the pod until it reaches a terminal phase
    async fn block_until_complete(&self, name: &str) -> Result<Option<String>> {
        let started = Instant::now();
        let mut node_logged = false;

        loop {
            if let Some(timeout) = self.config.poll_timeout {
                if started.elapsed() >= timeout {
                    return Err(RunnerError::PollTimeout {
                        name: name.to_string(),
                        timeout,
                    });
                }
            }

            let Some(current) = self.client.get_pod(name).await? else {
                warn!("Pod {} disappeared before reaching a terminal state", name);
                return Ok(None);
            };

            if !node_logged {
                if let Some(node) = current.spec.node_name.as_deref() {
                    info!("Pod {} assigned to node {}", name, node);
                    node_logged = true;
                }
            }

            let phase = current.status.as_ref().and_then(|s| s.phase);
            match phase {
                Some(PodPhase::Succeeded) => {
                    let message = termination_message(&current);
                    match &message {
                        Some(uri) => info!("Pod {} succeeded with result {}", name, uri),
                        None => info!("Pod {} succeeded without a termination message", name),
                    }
                    return Ok(message);
                }
                Some(PodPhase::Failed) => {
                    warn!("Pod {} failed", name);
                    return Ok(None);
                }
                _ => debug!("Pod {} is {:?}", name, phase),
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl ExecutionBackend for KubeBackend {
    async fn run(&self, spec: &RunSpec) -> Result<Option<String>> {
        let name = generate_pod_name();

        // Resolve every mounted volume request to a live claim up front
        let mut claim_mounts = Vec::new();
        for mount in spec.environment().volume_mounts() {
            let claim = self.claims.get_claim(mount.request()).await?;
            let claim_name = claim
                .metadata
                .name
                .unwrap_or_else(|| mount.request().id().to_string());
            claim_mounts.push((claim_name, mount.clone()));
        }

        let workload = build_pod(spec, &claim_mounts, &name)?;
        self.submit(&workload, &name).await?;

        let outcome = self.block_until_complete(&name).await;

        if let Err(e) = self.client.delete_pod(&name).await {
            warn!("Failed to delete pod {}: {}", name, e);
        }

        outcome
    }

    fn attaches_volumes(&self) -> bool {
        true
    }
}

/// Generates a unique pod name for one run
///
/// The name doubles as the execution id injected into the workload's
/// environment.
fn generate_pod_name() -> String {
    format!("hoist-run-{}", &Uuid::new_v4().simple().to_string()[..16])
}
