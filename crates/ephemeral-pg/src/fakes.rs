//! In-memory fakes for the host-facing traits (testing only)
//!
//! Pair these with `container_engine::fakes::RecordingEngine` to drive a
//! full sandbox lifecycle without Docker.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{SandboxError, SandboxResult};
use crate::shell::HostShell;

/// Shell that returns the same stdout for every command.
#[derive(Debug)]
pub struct FixedShell {
    stdout: Result<String, String>,
    commands: Mutex<Vec<String>>,
}

impl FixedShell {
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            stdout: Ok(stdout.into()),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Shell where every command fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            stdout: Err(reason.into()),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Commands received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostShell for FixedShell {
    async fn run(&self, command: &str, _cwd: &Path) -> SandboxResult<String> {
        self.commands.lock().unwrap().push(command.to_string());
        match &self.stdout {
            Ok(stdout) => Ok(stdout.clone()),
            Err(reason) => Err(SandboxError::Shell {
                command: command.to_string(),
                reason: reason.clone(),
            }),
        }
    }
}
