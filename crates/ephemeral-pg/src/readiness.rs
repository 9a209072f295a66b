//! Readiness probing through a linked sibling container.
//!
//! The probe runs inside a second container of the sandbox image, linked to
//! the database under the alias `db`, so it reaches the server on its
//! internal port via the link's environment variables rather than through
//! the host port mapping. The probe container idles on `cat` and each
//! attempt is a `docker exec` of `pg_isready`.

use std::sync::Arc;

use container_engine::{ContainerEngine, ContainerId, ImageHandle};
use tracing::{debug, info, warn};

use crate::config::ReadinessPolicy;
use crate::error::{SandboxError, SandboxResult};
use crate::guard::ScopedContainer;

/// Link alias of the database container inside the probe.
pub const PROBE_LINK_ALIAS: &str = "db";

/// Exits 0 once the linked server accepts connections.
pub const READINESS_COMMAND: &str =
    r#"pg_isready -h "$DB_PORT_5432_TCP_ADDR" -p "$DB_PORT_5432_TCP_PORT""#;

/// `docker run` arguments for the probe container.
pub fn probe_run_args(database: &ContainerId) -> Vec<String> {
    vec![
        "-t".to_string(),
        "--link".to_string(),
        format!("{}:{}", database, PROBE_LINK_ALIAS),
        "--entrypoint=".to_string(),
    ]
}

/// Command the probe container idles on between execs.
pub fn probe_idle_command() -> Vec<String> {
    vec!["cat".to_string()]
}

fn readiness_exec() -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        READINESS_COMMAND.to_string(),
    ]
}

/// Block until `database` accepts connections or the policy is exhausted.
///
/// Starts one probe container from `image`, polls, and always stops the
/// probe before returning. Returns the number of attempts used.
pub async fn wait_until_ready(
    engine: &Arc<dyn ContainerEngine>,
    image: &ImageHandle,
    database: &ContainerId,
    policy: &ReadinessPolicy,
) -> SandboxResult<u32> {
    let probe_id = engine
        .run_detached(image, &probe_run_args(database), &probe_idle_command())
        .await
        .map_err(|source| SandboxError::Run {
            image: image.to_string(),
            source,
        })?;
    let probe = ScopedContainer::new(Arc::clone(engine), probe_id, "readiness probe");

    let result = poll(engine.as_ref(), probe.id(), policy).await;

    if let Err(e) = probe.stop().await {
        warn!("Failed to stop readiness probe: {}", e);
    }
    result
}

async fn poll(
    engine: &dyn ContainerEngine,
    probe: &ContainerId,
    policy: &ReadinessPolicy,
) -> SandboxResult<u32> {
    let command = readiness_exec();
    let mut last_output = String::new();

    for attempt in 1..=policy.attempts {
        tokio::time::sleep(policy.interval()).await;

        match engine.exec(probe, &command).await {
            Ok(out) if out.success() => {
                info!(attempt, "Database is accepting connections");
                return Ok(attempt);
            }
            Ok(out) => {
                debug!(attempt, exit_code = out.exit_code, "Database not ready yet");
                last_output = format!("{}{}", out.stdout, out.stderr).trim().to_string();
            }
            Err(e) => {
                debug!(attempt, "Readiness probe exec failed: {}", e);
                last_output = e.to_string();
            }
        }
    }

    Err(SandboxError::ReadinessTimeout {
        attempts: policy.attempts,
        last_output,
    })
}
