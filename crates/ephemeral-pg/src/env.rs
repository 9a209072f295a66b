//! Pipeline environment: build id, job name and scratch root.

use std::path::PathBuf;

use crate::error::{SandboxError, SandboxResult};

pub const BUILD_ID_VAR: &str = "BUILD_ID";
pub const JOB_NAME_VAR: &str = "JOB_NAME";
/// Optional scratch root; defaults to the system temp dir.
pub const TMP_ROOT_VAR: &str = "WORKSPACE_TMP";

/// Values supplied by the CI system for the current build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineEnv {
    /// Unique identifier of the running build.
    pub build_id: String,

    /// Job name; lowercased into the image repository.
    pub job_name: String,

    /// Directory under which per-invocation workspaces are created.
    pub tmp_root: PathBuf,
}

impl PipelineEnv {
    pub fn new(
        build_id: impl Into<String>,
        job_name: impl Into<String>,
        tmp_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            build_id: build_id.into(),
            job_name: job_name.into(),
            tmp_root: tmp_root.into(),
        }
    }

    /// Read `BUILD_ID`, `JOB_NAME` and `WORKSPACE_TMP` from the process environment.
    pub fn from_env() -> SandboxResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`PipelineEnv::from_env`] with an injectable variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SandboxResult<Self> {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    SandboxError::Precondition(format!("environment variable {key} is not set"))
                })
        };

        let build_id = require(BUILD_ID_VAR)?;
        let job_name = require(JOB_NAME_VAR)?;
        let tmp_root = lookup(TMP_ROOT_VAR)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        Ok(Self {
            build_id,
            job_name,
            tmp_root,
        })
    }

    /// Image repository derived from the job name.
    ///
    /// Lowercased; anything outside `[a-z0-9._/-]` becomes `-`.
    pub fn image_repository(&self) -> String {
        self.job_name
            .to_lowercase()
            .chars()
            .map(|c| match c {
                'a'..='z' | '0'..='9' | '.' | '_' | '/' | '-' => c,
                _ => '-',
            })
            .collect()
    }

    /// Build id as it may appear in an image tag (`[A-Za-z0-9_.-]`).
    pub fn tag_build_id(&self) -> String {
        self.build_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }
}
