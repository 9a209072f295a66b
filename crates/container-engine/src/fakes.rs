//! In-memory fake container engine (testing only)
//!
//! `RecordingEngine` satisfies the [`ContainerEngine`] contract without a
//! container runtime. Every call is appended to a log so tests can assert
//! on ordering and counts, and failure modes are configurable up front.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::engine::{ContainerEngine, ContainerId, ExecOutput, ImageHandle};
use crate::error::EngineError;
use crate::EngineResult;

/// One recorded engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Build {
        tag: String,
        context_dir: PathBuf,
        /// Contents of `<context_dir>/Dockerfile` at build time, if readable.
        dockerfile: Option<String>,
    },
    Run {
        image: ImageHandle,
        run_args: Vec<String>,
        command: Vec<String>,
        container: ContainerId,
    },
    Exec {
        container: ContainerId,
        command: Vec<String>,
    },
    Stop {
        container: ContainerId,
    },
    RemoveImage {
        image: ImageHandle,
    },
}

#[derive(Debug, Default)]
struct EngineState {
    calls: Vec<EngineCall>,
    running: BTreeSet<ContainerId>,
    next_id: u32,
    exec_attempts: u32,
}

/// Fake engine that records calls and simulates readiness after N execs.
#[derive(Debug)]
pub struct RecordingEngine {
    state: Mutex<EngineState>,
    ready_on_attempt: Option<u32>,
    build_failure: Option<String>,
    run_failure: Option<String>,
    stop_failure: Option<String>,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingEngine {
    /// Engine where everything succeeds and the first exec reports ready.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            ready_on_attempt: Some(1),
            build_failure: None,
            run_failure: None,
            stop_failure: None,
        }
    }

    /// Execs return exit code 1 until the `attempt`-th one (1-based).
    pub fn ready_on_attempt(mut self, attempt: u32) -> Self {
        self.ready_on_attempt = Some(attempt);
        self
    }

    /// Every exec returns exit code 1.
    pub fn never_ready(mut self) -> Self {
        self.ready_on_attempt = None;
        self
    }

    pub fn failing_build(mut self, stderr: impl Into<String>) -> Self {
        self.build_failure = Some(stderr.into());
        self
    }

    pub fn failing_run(mut self, stderr: impl Into<String>) -> Self {
        self.run_failure = Some(stderr.into());
        self
    }

    /// `stop` records the call and removes the container, then reports an error.
    pub fn failing_stop(mut self, stderr: impl Into<String>) -> Self {
        self.stop_failure = Some(stderr.into());
        self
    }

    /// Full call log, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn builds(&self) -> Vec<EngineCall> {
        self.filtered(|c| matches!(c, EngineCall::Build { .. }))
    }

    pub fn runs(&self) -> Vec<EngineCall> {
        self.filtered(|c| matches!(c, EngineCall::Run { .. }))
    }

    pub fn execs(&self) -> Vec<EngineCall> {
        self.filtered(|c| matches!(c, EngineCall::Exec { .. }))
    }

    pub fn stops(&self) -> Vec<EngineCall> {
        self.filtered(|c| matches!(c, EngineCall::Stop { .. }))
    }

    pub fn removed_images(&self) -> Vec<EngineCall> {
        self.filtered(|c| matches!(c, EngineCall::RemoveImage { .. }))
    }

    /// Containers started and not yet stopped.
    pub fn running(&self) -> Vec<ContainerId> {
        self.state.lock().unwrap().running.iter().cloned().collect()
    }

    /// Whether `container` was stopped at some point.
    pub fn was_stopped(&self, container: &ContainerId) -> bool {
        self.stops()
            .iter()
            .any(|c| matches!(c, EngineCall::Stop { container: stopped } if stopped == container))
    }

    fn filtered(&self, keep: impl Fn(&EngineCall) -> bool) -> Vec<EngineCall> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| keep(c))
            .cloned()
            .collect()
    }

    fn failure(command: String, stderr: &str) -> EngineError {
        EngineError::CommandFailed {
            command,
            exit_code: 1,
            stderr: stderr.to_string(),
        }
    }
}

#[async_trait]
impl ContainerEngine for RecordingEngine {
    async fn build(&self, tag: &str, context_dir: &Path) -> EngineResult<ImageHandle> {
        let dockerfile = std::fs::read_to_string(context_dir.join("Dockerfile")).ok();
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Build {
            tag: tag.to_string(),
            context_dir: context_dir.to_path_buf(),
            dockerfile,
        });

        if let Some(stderr) = &self.build_failure {
            return Err(Self::failure(format!("docker build -t {tag}"), stderr));
        }
        Ok(ImageHandle::new(tag))
    }

    async fn run_detached(
        &self,
        image: &ImageHandle,
        run_args: &[String],
        command: &[String],
    ) -> EngineResult<ContainerId> {
        if let Some(stderr) = &self.run_failure {
            return Err(Self::failure(format!("docker run -d {image}"), stderr));
        }

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let container = ContainerId::new(format!("fake-{:04}", state.next_id));
        state.running.insert(container.clone());
        state.calls.push(EngineCall::Run {
            image: image.clone(),
            run_args: run_args.to_vec(),
            command: command.to_vec(),
            container: container.clone(),
        });
        Ok(container)
    }

    async fn exec(&self, container: &ContainerId, command: &[String]) -> EngineResult<ExecOutput> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Exec {
            container: container.clone(),
            command: command.to_vec(),
        });

        if !state.running.contains(container) {
            return Err(Self::failure(
                format!("docker exec {container}"),
                "No such container",
            ));
        }

        state.exec_attempts += 1;
        let ready = self
            .ready_on_attempt
            .is_some_and(|n| state.exec_attempts >= n);
        Ok(if ready {
            ExecOutput {
                exit_code: 0,
                stdout: "accepting connections\n".into(),
                stderr: String::new(),
            }
        } else {
            ExecOutput {
                exit_code: 1,
                stdout: "no response\n".into(),
                stderr: String::new(),
            }
        })
    }

    async fn stop(&self, container: &ContainerId) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Stop {
            container: container.clone(),
        });
        state.running.remove(container);

        if let Some(stderr) = &self.stop_failure {
            return Err(Self::failure(format!("docker stop {container}"), stderr));
        }
        Ok(())
    }

    async fn remove_image(&self, image: &ImageHandle) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::RemoveImage {
            image: image.clone(),
        });
        Ok(())
    }
}
