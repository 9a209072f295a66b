//! Error types for container-engine

use thiserror::Error;

/// Errors that can occur while driving the container runtime
#[derive(Error, Debug)]
pub enum EngineError {
    /// The runtime binary could not be spawned at all
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The runtime ran but reported a failure
    #[error("`{command}` exited with code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The runtime succeeded but printed something we cannot use
    #[error("unexpected runtime output: {0}")]
    InvalidOutput(String),
}

impl EngineError {
    /// Exit code reported by the runtime, if it got far enough to report one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            EngineError::CommandFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}
