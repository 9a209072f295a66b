//! Run configuration for a sandbox database.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SandboxError, SandboxResult};

pub const DEFAULT_DATABASE_USER: &str = "jenkins";
pub const DEFAULT_ENGINE_VERSION: &str = "latest";

static SEED_NONCE: AtomicU64 = AtomicU64::new(0);

/// Seed from the wall clock, the process id and a process-wide counter.
///
/// Two configurations created in the same nanosecond still get different
/// seeds because of the counter.
pub fn default_seed() -> u64 {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default() as u64;
    let nonce = SEED_NONCE.fetch_add(1, Ordering::Relaxed);
    nanos ^ (u64::from(std::process::id()) << 32) ^ nonce.wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

fn default_database_user() -> String {
    DEFAULT_DATABASE_USER.to_string()
}

fn default_engine_version() -> String {
    DEFAULT_ENGINE_VERSION.to_string()
}

fn default_remove_image() -> bool {
    true
}

/// How long to wait for the database to accept connections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Number of probe attempts before giving up.
    pub attempts: u32,
    /// Sleep before each attempt (milliseconds).
    pub interval_ms: u64,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval_ms: 1_000,
        }
    }
}

impl ReadinessPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Immutable input to one or more sandbox runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfiguration {
    /// Database created at container init. Required.
    pub database_name: String,

    /// Host port; `1` followed by four random digits when unset.
    #[serde(default)]
    pub port: Option<String>,

    /// Owner of the database and of the server process.
    #[serde(default = "default_database_user")]
    pub database_user: String,

    /// Numeric uid for `database_user`; `id -u` on the host when unset.
    #[serde(default)]
    pub uid: Option<String>,

    /// Tag of the `postgres` base image.
    #[serde(default = "default_engine_version")]
    pub engine_version: String,

    #[serde(default = "default_seed")]
    pub random_seed: u64,

    #[serde(default)]
    pub readiness: ReadinessPolicy,

    /// Remove the per-run image tag during teardown.
    #[serde(default = "default_remove_image")]
    pub remove_image: bool,
}

impl RunConfiguration {
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            port: None,
            database_user: default_database_user(),
            uid: None,
            engine_version: default_engine_version(),
            random_seed: default_seed(),
            readiness: ReadinessPolicy::default(),
            remove_image: true,
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn with_database_user(mut self, user: impl Into<String>) -> Self {
        self.database_user = user.into();
        self
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_engine_version(mut self, version: impl Into<String>) -> Self {
        self.engine_version = version.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn keep_image(mut self) -> Self {
        self.remove_image = false;
        self
    }

    /// Parse a configuration from JSON; omitted fields take their defaults.
    pub fn from_json(json: &str) -> SandboxResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file.
    pub fn load(path: &Path) -> SandboxResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Check every field that ends up in a Dockerfile or a `docker run` argument.
    pub fn validate(&self) -> SandboxResult<()> {
        require_token("database name", &self.database_name)?;
        require_token("database user", &self.database_user)?;
        require_token("engine version", &self.engine_version)?;

        if let Some(port) = &self.port {
            match port.parse::<u16>() {
                Ok(p) if p > 0 => {}
                _ => {
                    return Err(SandboxError::Precondition(format!(
                        "port must be a number in 1..=65535, got {port:?}"
                    )))
                }
            }
        }

        if let Some(uid) = &self.uid {
            if uid.is_empty() || !uid.chars().all(|c| c.is_ascii_digit()) {
                return Err(SandboxError::Precondition(format!(
                    "uid must be numeric, got {uid:?}"
                )));
            }
        }

        if self.readiness.attempts == 0 {
            return Err(SandboxError::Precondition(
                "readiness attempts must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

/// Non-empty and free of whitespace, so it cannot break a Dockerfile line.
fn require_token(what: &str, value: &str) -> SandboxResult<()> {
    if value.is_empty() {
        return Err(SandboxError::Precondition(format!("{what} must not be empty")));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(SandboxError::Precondition(format!(
            "{what} must not contain whitespace, got {value:?}"
        )));
    }
    Ok(())
}
