//! Run identity - seeded digit strings for unique names and ports
//!
//! Every invocation needs a temp directory, an image tag and (usually) a host
//! port that do not collide with other pipeline runs on the same machine.
//! All three derive from a single `u64` seed so a run can be reproduced.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::env::PipelineEnv;
use crate::error::{SandboxError, SandboxResult};

/// Length of the suffix shared by the temp directory and image tag.
pub const SUFFIX_LEN: i64 = 8;

/// Random digits appended to the leading `1` of a default port.
pub const PORT_DIGITS: i64 = 4;

/// Mixed into the seed for port digits so they are not a prefix of the suffix.
const PORT_SALT: u64 = 0x706f_7274_7365_6564;

/// Generate `length` decimal digits from `seed`.
///
/// Deterministic for a given `(length, seed)`; not suitable for secrets.
pub fn generate_digits(length: i64, seed: u64) -> SandboxResult<String> {
    if length <= 0 {
        return Err(SandboxError::InvalidArgument(format!(
            "digit string length must be positive, got {length}"
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    Ok((0..length)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect())
}

/// Names and port for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    /// 8-digit random suffix.
    pub suffix: String,

    /// `<tmp-root>/<build-id>/postgres-<suffix>`
    pub temp_dir: PathBuf,

    /// `<job-name>:<build-id>-<suffix>`
    pub image_tag: String,

    /// Host port mapped to the database's internal port.
    pub port: String,
}

impl RunIdentity {
    /// Derive the identity for `seed`. An explicit port is used verbatim.
    pub fn derive(
        seed: u64,
        env: &PipelineEnv,
        explicit_port: Option<&str>,
    ) -> SandboxResult<Self> {
        let suffix = generate_digits(SUFFIX_LEN, seed)?;

        let port = match explicit_port {
            Some(port) => port.to_string(),
            None => format!("1{}", generate_digits(PORT_DIGITS, seed ^ PORT_SALT)?),
        };

        let temp_dir = env
            .tmp_root
            .join(&env.build_id)
            .join(format!("postgres-{suffix}"));

        let image_tag = format!(
            "{}:{}-{}",
            env.image_repository(),
            env.tag_build_id(),
            suffix
        );

        Ok(Self {
            suffix,
            temp_dir,
            image_tag,
            port,
        })
    }
}
