//! Container-Engine: Container Runtime Abstraction for ephemeral-pg
//!
//! This crate provides the container layer used by the sandbox lifecycle.
//! It interfaces with a Docker-compatible CLI for image builds, detached
//! runs, in-container exec and teardown.
//!
//! ## Layer 0 - Container Runtime
//!
//! Focus: Predictable command construction and faithful error reporting.
//!
//! ## Key Components
//!
//! - `ContainerEngine`: async trait consumed by the lifecycle manager
//! - `DockerCli`: implementation that shells out to `docker` (or `podman`)
//! - `fakes::RecordingEngine`: in-memory engine that records every call

mod docker;
pub mod engine;
mod error;
pub mod fakes;

pub use docker::DockerCli;
pub use engine::{ContainerEngine, ContainerId, ExecOutput, ImageHandle};
pub use error::EngineError;

/// Result type for container-engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;
