//! Container engine trait definitions
//!
//! The lifecycle manager only ever talks to the runtime through
//! [`ContainerEngine`]. Implementations:
//! - [`crate::DockerCli`]: real runtime via the `docker` CLI
//! - [`crate::fakes::RecordingEngine`]: in-memory fake for tests

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::EngineResult;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// A built (or pullable) image reference, e.g. `my-job:42-01234567`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageHandle(String);

impl ImageHandle {
    pub fn new(reference: impl Into<String>) -> Self {
        ImageHandle(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        ContainerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 bytes), as `docker ps` prints it.
    ///
    /// Ids that do not split on a char boundary at byte 12 are returned whole.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Captured result of a command executed inside a running container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    /// Exit code (0 = success).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// ---------------------------------------------------------------------------
// ContainerEngine
// ---------------------------------------------------------------------------

/// Abstract container runtime.
///
/// Guarantees expected from implementations:
/// - `build` returns only once the image exists under `tag`.
/// - `run_detached` returns only once the container has been created and
///   started; the returned id is accepted by `exec` and `stop`.
/// - `exec` reports a non-zero exit as `Ok(ExecOutput)`, not as an error.
///   Errors are reserved for the runtime itself failing.
/// - `stop` leaves no container behind (stopped and removed).
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Build an image from the `Dockerfile` in `context_dir` and tag it.
    async fn build(&self, tag: &str, context_dir: &Path) -> EngineResult<ImageHandle>;

    /// Start `image` in the background.
    ///
    /// `run_args` go between `run -d` and the image reference; `command`
    /// follows the image reference and may be empty.
    async fn run_detached(
        &self,
        image: &ImageHandle,
        run_args: &[String],
        command: &[String],
    ) -> EngineResult<ContainerId>;

    /// Execute `command` inside a running container.
    async fn exec(&self, container: &ContainerId, command: &[String]) -> EngineResult<ExecOutput>;

    /// Stop and remove a container.
    async fn stop(&self, container: &ContainerId) -> EngineResult<()>;

    /// Remove an image tag.
    async fn remove_image(&self, image: &ImageHandle) -> EngineResult<()>;
}
