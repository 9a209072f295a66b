//! Ephemeral-PG: Throwaway PostgreSQL Containers for Build Pipelines
//!
//! This crate provisions a disposable PostgreSQL server inside a container
//! for the duration of a closure, then tears everything down: the database
//! container is stopped and removed, and the per-run temp workspace is
//! deleted, whether the closure returned, failed or panicked.
//!
//! ## Layer 1 - Sandbox Lifecycle
//!
//! Focus: Unique per-run naming and cleanup on every exit path.
//!
//! ## Key Components
//!
//! - `generate_digits` / `RunIdentity`: seeded names, tags and ports
//! - `render_dockerfile`: image recipe with a uid-matched database user
//! - `PostgresSandbox`: `with_db` and `with_linked_container`
//! - `fakes`: host shell fake for tests (pair with
//!   `container_engine::fakes::RecordingEngine`)
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! let rows = ephemeral_pg::with_db("appdb", |port, container| async move {
//!     println!("postgres on localhost:{port} in {container}");
//!     Ok::<_, anyhow::Error>(0)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dirs;
pub mod dockerfile;
pub mod env;
mod error;
pub mod fakes;
pub mod guard;
pub mod identity;
pub mod lifecycle;
pub mod readiness;
pub mod shell;
pub mod telemetry;

use std::future::Future;

pub use config::{ReadinessPolicy, RunConfiguration};
pub use container_engine::{ContainerEngine, ContainerId, DockerCli, ImageHandle};
pub use dirs::DirStack;
pub use dockerfile::render_dockerfile;
pub use env::PipelineEnv;
pub use error::{SandboxError, SandboxResult};
pub use identity::{generate_digits, RunIdentity};
pub use lifecycle::PostgresSandbox;
pub use shell::{HostShell, SystemShell};
pub use telemetry::init_tracing;

/// Run `callback` against a fresh database named `database_name`.
///
/// Uses the `docker` CLI and reads `BUILD_ID`, `JOB_NAME` and
/// `WORKSPACE_TMP` from the environment; every other setting takes its
/// default. Build a [`PostgresSandbox`] directly for anything else.
pub async fn with_db<F, Fut, R, E>(database_name: &str, callback: F) -> Result<R, E>
where
    F: FnOnce(String, ContainerId) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: From<SandboxError>,
{
    let sandbox = PostgresSandbox::docker(RunConfiguration::new(database_name))?;
    sandbox.with_db(callback).await
}

/// Run `image` linked to a fresh database (alias `postgres`), then `callback`.
///
/// `extra_args` are appended to the `docker run` arguments of the linked
/// container. See [`PostgresSandbox::with_linked_container`].
pub async fn with_linked_container<F, Fut, R, E>(
    image: &str,
    database_name: &str,
    extra_args: &[String],
    callback: F,
) -> Result<R, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: From<SandboxError>,
{
    if image.trim().is_empty() {
        return Err(E::from(SandboxError::Precondition(
            "linked image must not be empty".into(),
        )));
    }
    let sandbox = PostgresSandbox::docker(RunConfiguration::new(database_name))?;
    sandbox
        .with_linked_container(image, extra_args, callback)
        .await
}
