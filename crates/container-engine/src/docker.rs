//! Docker CLI backend
//!
//! Every operation is a single `docker` invocation executed with
//! `tokio::process`. Podman works too via [`DockerCli::with_binary`].

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::engine::{ContainerEngine, ContainerId, ExecOutput, ImageHandle};
use crate::error::EngineError;
use crate::EngineResult;

/// [`ContainerEngine`] backed by the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a different Docker-compatible client, e.g. `podman`.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn describe(&self, args: &[String]) -> String {
        let mut parts = Vec::with_capacity(args.len() + 1);
        parts.push(self.binary.as_str());
        parts.extend(args.iter().map(String::as_str));
        parts.join(" ")
    }

    /// Run the client and capture its output, whatever the exit status.
    async fn output(&self, args: &[String]) -> EngineResult<ExecOutput> {
        let command = self.describe(args);
        debug!("Running {}", command);

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                command: command.clone(),
                source,
            })?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Run the client and fail unless it exits with code 0.
    async fn checked(&self, args: &[String]) -> EngineResult<String> {
        let output = self.output(args).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(EngineError::CommandFailed {
                command: self.describe(args),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Arguments for `docker run -d`.
pub(crate) fn detached_run_args(
    image: &ImageHandle,
    run_args: &[String],
    command: &[String],
) -> Vec<String> {
    let mut args = vec!["run".to_string(), "-d".to_string()];
    args.extend(run_args.iter().cloned());
    args.push(image.as_str().to_string());
    args.extend(command.iter().cloned());
    args
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn build(&self, tag: &str, context_dir: &Path) -> EngineResult<ImageHandle> {
        let args = vec![
            "build".to_string(),
            "-t".to_string(),
            tag.to_string(),
            context_dir.to_string_lossy().to_string(),
        ];
        self.checked(&args).await?;
        Ok(ImageHandle::new(tag))
    }

    async fn run_detached(
        &self,
        image: &ImageHandle,
        run_args: &[String],
        command: &[String],
    ) -> EngineResult<ContainerId> {
        let stdout = self.checked(&detached_run_args(image, run_args, command)).await?;
        let id = stdout.trim();
        if id.is_empty() {
            return Err(EngineError::InvalidOutput(format!(
                "`{} run -d {}` printed no container id",
                self.binary, image
            )));
        }
        Ok(ContainerId::new(id))
    }

    async fn exec(&self, container: &ContainerId, command: &[String]) -> EngineResult<ExecOutput> {
        let mut args = vec!["exec".to_string(), container.as_str().to_string()];
        args.extend(command.iter().cloned());
        self.output(&args).await
    }

    async fn stop(&self, container: &ContainerId) -> EngineResult<()> {
        let stopped = self
            .checked(&["stop".to_string(), container.as_str().to_string()])
            .await;
        if let Err(e) = &stopped {
            warn!("docker stop {} failed, forcing removal: {}", container.short(), e);
        }

        self.checked(&[
            "rm".to_string(),
            "-f".to_string(),
            container.as_str().to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn remove_image(&self, image: &ImageHandle) -> EngineResult<()> {
        self.checked(&["rmi".to_string(), image.as_str().to_string()])
            .await?;
        Ok(())
    }
}
