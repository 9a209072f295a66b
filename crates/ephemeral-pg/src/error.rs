//! Error types for ephemeral-pg

use container_engine::EngineError;
use thiserror::Error;

/// Errors produced while provisioning or tearing down a sandbox database.
///
/// Errors returned by the caller's closure never pass through this type;
/// they reach the caller unchanged.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Required input missing or malformed; raised before any side effect.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The container engine rejected the generated Dockerfile.
    #[error("image build failed for {tag}: {source}")]
    Build {
        tag: String,
        #[source]
        source: EngineError,
    },

    /// A container could not be started.
    #[error("failed to start container from {image}: {source}")]
    Run {
        image: String,
        #[source]
        source: EngineError,
    },

    /// The container started but never accepted connections.
    #[error("database not ready after {attempts} attempt(s); last probe output: {last_output}")]
    ReadinessTimeout { attempts: u32, last_output: String },

    /// A host shell command failed.
    #[error("host command `{command}` failed: {reason}")]
    Shell { command: String, reason: String },

    #[error("could not determine host uid: {0}")]
    UidLookup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl SandboxError {
    /// `true` when the database started but failed its readiness probe.
    pub fn is_readiness_timeout(&self) -> bool {
        matches!(self, SandboxError::ReadinessTimeout { .. })
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
