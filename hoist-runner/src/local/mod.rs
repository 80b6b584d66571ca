//! Local Docker execution backend
//!
//! Runs the continuation in a container against the local Docker daemon,
//! mainly for development and debugging. The Kubernetes termination log is
//! emulated with a host temp file bound at the same in-container path, so
//! workloads write their result location the same way on both backends.
//!
//! Claim-backed volume mounts are cluster-only and are ignored here with a
//! warning; secret mounts are interpreted as read-only host-path binds,
//! with the secret name naming the host directory.

pub mod docker;

pub use docker::{ContainerRuntime, DockerCli};

use crate::backend::ExecutionBackend;
use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::kube::pod::EXECUTION_ID_ENV;
use async_trait::async_trait;
use docker::{Bind, ContainerSpec};
use hoist_core::{RunSpec, ensure_tag};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// In-container path of the emulated termination log
const TERMINATION_LOG_PATH: &str = "/dev/termination-log";

/// Docker-backed [`ExecutionBackend`]
pub struct LocalBackend {
    runtime: Arc<dyn ContainerRuntime>,
    config: RunnerConfig,
}

impl LocalBackend {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: RunnerConfig) -> Self {
        Self { runtime, config }
    }

    async fn execute(
        &self,
        spec: &RunSpec,
        name: &str,
        termination_path: &Path,
    ) -> Result<Option<String>> {
        let image = spec.image().ok_or(RunnerError::MissingImage)?;
        let image = ensure_tag(image);

        if !self.runtime.image_present(&image).await? {
            info!("Pulling image {}", image);
            self.runtime.pull(&image).await?;
        }

        let environment = spec.environment();

        let mut binds = vec![Bind {
            host_path: termination_path.to_path_buf(),
            container_path: TERMINATION_LOG_PATH.to_string(),
            read_only: false,
        }];
        for secret in environment.secret_mounts() {
            binds.push(Bind {
                host_path: PathBuf::from(secret.name()),
                container_path: secret.mount_path().to_string(),
                read_only: true,
            });
        }
        if !environment.volume_mounts().is_empty() {
            warn!(
                "Ignoring {} claim-backed volume mount(s); volume claims only apply on a cluster",
                environment.volume_mounts().len()
            );
        }

        if let Some(sidecar) = spec.logging_sidecar() {
            let sidecar_spec = ContainerSpec {
                name: sidecar_name(name),
                image: ensure_tag(&sidecar.image),
                cmd: sidecar.args.clone(),
                env: Vec::new(),
                binds: binds.clone(),
            };
            self.runtime.create(&sidecar_spec).await?;
            self.runtime.start(&sidecar_spec.name).await?;
            info!("Started logging sidecar {}", sidecar_spec.name);
        }

        let container = ContainerSpec {
            name: name.to_string(),
            image,
            cmd: vec![
                spec.staged_continuation()
                    .manifest_location()
                    .to_string(),
            ],
            env: vec![(EXECUTION_ID_ENV.to_string(), name.to_string())],
            binds,
        };
        self.runtime.create(&container).await?;
        self.runtime.start(name).await?;
        info!("Started local container {}", name);

        let state = self.block_until_exit(name).await?;
        if state.exit_code != 0 {
            warn!("Container {} exited with code {}", name, state.exit_code);
            return Ok(None);
        }

        let message = tokio::fs::read_to_string(termination_path).await?;
        let message = message.trim();
        if message.is_empty() {
            info!("Container {} succeeded without a termination message", name);
            Ok(None)
        } else {
            info!("Container {} succeeded with result {}", name, message);
            Ok(Some(message.to_string()))
        }
    }

    async fn block_until_exit(&self, name: &str) -> Result<docker::ContainerState> {
        let started = Instant::now();

        loop {
            let state = self.runtime.inspect(name).await?;
            if !state.running {
                return Ok(state);
            }

            if let Some(timeout) = self.config.poll_timeout {
                if started.elapsed() >= timeout {
                    return Err(RunnerError::PollTimeout {
                        name: name.to_string(),
                        timeout,
                    });
                }
            }

            tokio::time::sleep(self.config.local_poll_interval).await;
        }
    }

    /// Best-effort teardown; failures are logged, never propagated
    async fn cleanup(&self, name: &str, had_sidecar: bool, termination_path: &Path) {
        if had_sidecar {
            let sidecar = sidecar_name(name);
            if let Err(e) = self.runtime.stop(&sidecar).await {
                warn!("Failed to stop sidecar {}: {}", sidecar, e);
            }
            if let Err(e) = self.runtime.remove(&sidecar).await {
                warn!("Failed to remove sidecar {}: {}", sidecar, e);
            }
        }
        if let Err(e) = self.runtime.remove(name).await {
            warn!("Failed to remove container {}: {}", name, e);
        }
        if let Err(e) = tokio::fs::remove_file(termination_path).await {
            warn!(
                "Failed to delete termination log {}: {}",
                termination_path.display(),
                e
            );
        }
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    async fn run(&self, spec: &RunSpec) -> Result<Option<String>> {
        let name = generate_container_name();

        // The bind target must exist before the container does
        let termination_path =
            std::env::temp_dir().join(format!("{}-termination.log", name));
        tokio::fs::write(&termination_path, b"").await?;

        let outcome = self.execute(spec, &name, &termination_path).await;
        self.cleanup(&name, spec.logging_sidecar().is_some(), &termination_path)
            .await;
        outcome
    }
}

fn generate_container_name() -> String {
    format!("hoist-run-{}", &Uuid::new_v4().simple().to_string()[..16])
}

fn sidecar_name(container: &str) -> String {
    format!("{}-logs", container)
}
