//! Host shell access, used to look up the numeric uid of the build user.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{SandboxError, SandboxResult};

/// Command that prints the numeric uid of the current user.
pub const UID_COMMAND: &str = "id -u";

/// Runs a shell command on the host and returns its stdout.
#[async_trait]
pub trait HostShell: Send + Sync {
    /// Run `command` in `cwd`. A non-zero exit is an error.
    async fn run(&self, command: &str, cwd: &Path) -> SandboxResult<String>;
}

/// [`HostShell`] backed by `sh -c`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShell;

#[async_trait]
impl HostShell for SystemShell {
    async fn run(&self, command: &str, cwd: &Path) -> SandboxResult<String> {
        debug!("Running `{}` in {:?}", command, cwd);

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SandboxError::Shell {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(SandboxError::Shell {
                command: command.to_string(),
                reason: format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Ask the host for the current uid.
pub async fn host_uid(shell: &dyn HostShell, cwd: &Path) -> SandboxResult<String> {
    let stdout = shell.run(UID_COMMAND, cwd).await?;
    let uid = stdout.trim();
    if uid.is_empty() || !uid.chars().all(|c| c.is_ascii_digit()) {
        return Err(SandboxError::UidLookup(format!(
            "`{UID_COMMAND}` printed {stdout:?}"
        )));
    }
    Ok(uid.to_string())
}
