//! Docker CLI container runtime
//!
//! [`ContainerRuntime`] is the container lifecycle slice the local backend
//! needs; [`DockerCli`] implements it by shelling out to the `docker`
//! binary. Tests implement the trait over an in-memory fake instead.

use crate::error::{Result, RunnerError};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// A host path bound into a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

/// Everything needed to create one container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<(String, String)>,
    pub binds: Vec<Bind>,
}

/// A point-in-time snapshot of a container's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: i32,
}

/// Container lifecycle operations the local backend drives
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_present(&self, image: &str) -> Result<bool>;
    async fn pull(&self, image: &str) -> Result<()>;
    async fn create(&self, spec: &ContainerSpec) -> Result<()>;
    async fn start(&self, name: &str) -> Result<()>;
    async fn inspect(&self, name: &str) -> Result<ContainerState>;
    async fn stop(&self, name: &str) -> Result<()>;
    async fn remove(&self, name: &str) -> Result<()>;
}

/// [`ContainerRuntime`] backed by the `docker` command line client
#[derive(Debug, Default)]
pub struct DockerCli;

impl DockerCli {
    pub fn new() -> Self {
        Self
    }

    /// Runs one docker subcommand and captures its output
    async fn docker(&self, args: &[&str]) -> Result<String> {
        debug!("Running docker {:?}", args);

        let output = Command::new("docker").args(args).output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stdout.trim().is_empty() {
            debug!("docker stdout: {}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("docker stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(RunnerError::Runtime(format!(
                "docker {:?} failed: exit_code={}, stderr='{}'",
                args,
                exit_code,
                stderr.trim()
            )));
        }

        Ok(stdout.trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn image_present(&self, image: &str) -> Result<bool> {
        let listed = self
            .docker(&["images", "--format", "{{.Repository}}:{{.Tag}}", image])
            .await?;
        Ok(listed.lines().any(|line| line.trim() == image))
    }

    async fn pull(&self, image: &str) -> Result<()> {
        self.docker(&["pull", image]).await?;
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<()> {
        let mut args: Vec<String> = vec!["create".into(), "--name".into(), spec.name.clone()];

        for (name, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{}={}", name, value));
        }
        for bind in &spec.binds {
            let mode = if bind.read_only { ":ro" } else { "" };
            args.push("-v".into());
            args.push(format!(
                "{}:{}{}",
                bind.host_path.display(),
                bind.container_path,
                mode
            ));
        }

        args.push(spec.image.clone());
        args.extend(spec.cmd.iter().cloned());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.docker(&arg_refs).await?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.docker(&["start", name]).await?;
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<ContainerState> {
        let output = self
            .docker(&[
                "inspect",
                "--format",
                "{{.State.Running}} {{.State.ExitCode}}",
                name,
            ])
            .await?;

        let mut parts = output.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(running), Some(exit_code)) => Ok(ContainerState {
                running: running == "true",
                exit_code: exit_code.parse().map_err(|_| {
                    RunnerError::Runtime(format!(
                        "unparseable exit code in docker inspect output '{}'",
                        output
                    ))
                })?,
            }),
            _ => Err(RunnerError::Runtime(format!(
                "unexpected docker inspect output '{}'",
                output
            ))),
        }
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.docker(&["stop", name]).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.docker(&["rm", "-f", name]).await?;
        Ok(())
    }
}
