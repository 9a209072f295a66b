//! Sandbox lifecycle: build → run → wait → callback → teardown.
//!
//! [`PostgresSandbox::with_db`] is the only place that sequences the
//! collaborators. Teardown (database container, then image tag, then temp
//! workspace) runs on every exit path once the workspace exists, including
//! a panicking callback, which is resumed afterwards.

use std::future::Future;
use std::path::{Component, Path};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use container_engine::{ContainerEngine, ContainerId, DockerCli, ImageHandle};
use futures::FutureExt;
use tracing::{info, warn};

use crate::config::RunConfiguration;
use crate::dirs::DirStack;
use crate::dockerfile::{render_dockerfile, DATA_PATH, INTERNAL_PORT};
use crate::env::PipelineEnv;
use crate::error::{SandboxError, SandboxResult};
use crate::guard::{ScopedContainer, TempWorkspace};
use crate::identity::RunIdentity;
use crate::readiness::wait_until_ready;
use crate::shell::{host_uid, HostShell, SystemShell};

/// Subdirectory of the workspace mounted as the server's data directory.
pub const DATA_DIR: &str = "data";

/// File name of the generated build specification.
pub const DOCKERFILE: &str = "Dockerfile";

/// Link alias under which a linked container sees the database.
pub const LINKED_ALIAS: &str = "postgres";

/// Everything owned by one `with_db` call.
///
/// Teardown takes resources out as it releases them. Whatever is still
/// held when the context drops (the call was cancelled) is released by a
/// background task in the same order: database, image, workspace.
struct RunContext {
    identity: RunIdentity,
    dirs: DirStack,
    engine: Arc<dyn ContainerEngine>,
    remove_image: bool,
    workspace: Option<TempWorkspace>,
    image: Option<ImageHandle>,
    database: Option<ScopedContainer>,
}

impl Drop for RunContext {
    fn drop(&mut self) {
        let database = self.database.take();
        let image = self.image.take().filter(|_| self.remove_image);
        let workspace = self.workspace.take();
        if database.is_none() && image.is_none() && workspace.is_none() {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                // The guards' own drops still stop what they can.
                warn!(
                    "Sandbox {} dropped outside a tokio runtime; image {:?} left behind",
                    self.identity.image_tag,
                    image.as_ref().map(ImageHandle::as_str)
                );
                return;
            }
        };

        warn!(
            image = %self.identity.image_tag,
            "Sandbox dropped before teardown; cleaning up in background"
        );
        let engine = Arc::clone(&self.engine);
        handle.spawn(async move {
            if let Some(database) = database {
                if let Err(e) = database.stop().await {
                    warn!("Background stop of database container failed: {}", e);
                }
            }
            if let Some(image) = image {
                if let Err(e) = engine.remove_image(&image).await {
                    warn!("Background removal of image {} failed: {}", image, e);
                }
            }
            // Removes the directory synchronously.
            drop(workspace);
        });
    }
}

/// Provisions throwaway PostgreSQL containers.
///
/// One value can serve many concurrent calls; each call derives its own
/// identity from the configured seed and an invocation counter.
pub struct PostgresSandbox {
    config: RunConfiguration,
    env: PipelineEnv,
    engine: Arc<dyn ContainerEngine>,
    shell: Arc<dyn HostShell>,
    invocations: AtomicU64,
}

impl std::fmt::Debug for PostgresSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSandbox")
            .field("config", &self.config)
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

impl PostgresSandbox {
    pub fn new(
        config: RunConfiguration,
        env: PipelineEnv,
        engine: Arc<dyn ContainerEngine>,
        shell: Arc<dyn HostShell>,
    ) -> Self {
        Self {
            config,
            env,
            engine,
            shell,
            invocations: AtomicU64::new(0),
        }
    }

    /// Sandbox using the `docker` CLI, `sh`, and the CI environment variables.
    pub fn docker(config: RunConfiguration) -> SandboxResult<Self> {
        Ok(Self::new(
            config,
            PipelineEnv::from_env()?,
            Arc::new(DockerCli::new()),
            Arc::new(SystemShell),
        ))
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    pub fn env(&self) -> &PipelineEnv {
        &self.env
    }

    fn check_preconditions(&self) -> SandboxResult<()> {
        self.config.validate()?;
        if self.env.build_id.trim().is_empty() {
            return Err(SandboxError::Precondition("build id must not be empty".into()));
        }
        if self.env.job_name.trim().is_empty() {
            return Err(SandboxError::Precondition("job name must not be empty".into()));
        }
        if !is_single_path_component(&self.env.build_id) {
            return Err(SandboxError::Precondition(format!(
                "build id must be a single path component, got {:?}",
                self.env.build_id
            )));
        }
        Ok(())
    }

    fn next_identity(&self) -> SandboxResult<RunIdentity> {
        let n = self.invocations.fetch_add(1, Ordering::Relaxed);
        let seed = self.config.random_seed.wrapping_add(n);
        RunIdentity::derive(seed, &self.env, self.config.port.as_deref())
    }

    /// Run `callback` against a fresh database container.
    ///
    /// The callback receives the host port and the database container id.
    /// Its error is returned unchanged; sandbox failures are converted into
    /// the caller's error type through `From<SandboxError>`.
    pub async fn with_db<F, Fut, R, E>(&self, callback: F) -> Result<R, E>
    where
        F: FnOnce(String, ContainerId) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<SandboxError>,
    {
        self.check_preconditions()?;

        let identity = self.next_identity()?;
        let dirs = DirStack::current()?;
        let workspace = TempWorkspace::create(&identity.temp_dir)
            .await
            .map_err(SandboxError::from)?;

        info!(
            database = %self.config.database_name,
            image = %identity.image_tag,
            port = %identity.port,
            workspace = ?identity.temp_dir,
            "Provisioning sandbox database"
        );

        let mut ctx = RunContext {
            identity,
            dirs,
            engine: Arc::clone(&self.engine),
            remove_image: self.config.remove_image,
            workspace: Some(workspace),
            image: None,
            database: None,
        };

        let outcome = match self.provision(&mut ctx).await {
            Ok(database) => {
                ctx.dirs.reset();
                let port = ctx.identity.port.clone();
                AssertUnwindSafe(async move { callback(port, database).await })
                    .catch_unwind()
                    .await
            }
            Err(e) => Ok(Err(E::from(e))),
        };

        self.teardown(&mut ctx).await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Steps up to and including readiness. Resources created along the way
    /// are recorded in `ctx` so teardown can find them on failure.
    async fn provision(&self, ctx: &mut RunContext) -> SandboxResult<ContainerId> {
        ctx.dirs.push(&ctx.identity.temp_dir);

        let uid = match &self.config.uid {
            Some(uid) => uid.clone(),
            None => host_uid(self.shell.as_ref(), ctx.dirs.cwd()).await?,
        };

        let dockerfile = render_dockerfile(
            &self.config.engine_version,
            &uid,
            &self.config.database_user,
            &self.config.database_name,
        );
        tokio::fs::write(ctx.dirs.cwd().join(DOCKERFILE), dockerfile).await?;

        info!(tag = %ctx.identity.image_tag, uid = %uid, "Building sandbox image");
        let image = self
            .engine
            .build(&ctx.identity.image_tag, ctx.dirs.cwd())
            .await
            .map_err(|source| SandboxError::Build {
                tag: ctx.identity.image_tag.clone(),
                source,
            })?;
        ctx.image = Some(image.clone());

        let run_args = {
            let data = ctx.dirs.enter(DATA_DIR);
            tokio::fs::create_dir_all(data.cwd()).await?;
            database_run_args(&ctx.identity.port, &data.cwd().to_string_lossy())
        };

        let id = self
            .engine
            .run_detached(&image, &run_args, &[])
            .await
            .map_err(|source| SandboxError::Run {
                image: image.to_string(),
                source,
            })?;
        info!(container = %id.short(), port = %ctx.identity.port, "Database container started");
        let database = ScopedContainer::new(Arc::clone(&self.engine), id.clone(), "database");
        ctx.database = Some(database);

        wait_until_ready(&self.engine, &image, &id, &self.config.readiness).await?;
        Ok(id)
    }

    async fn teardown(&self, ctx: &mut RunContext) {
        if let Some(database) = ctx.database.take() {
            let id = database.id().clone();
            match database.stop().await {
                Ok(()) => info!(container = %id.short(), "Database container stopped"),
                Err(e) => warn!("Failed to stop database container {}: {}", id, e),
            }
        }

        if self.config.remove_image {
            if let Some(image) = ctx.image.clone() {
                if let Err(e) = self.engine.remove_image(&image).await {
                    warn!("Failed to remove image {}: {}", image, e);
                }
            }
        }
        ctx.image = None;

        if let Some(workspace) = ctx.workspace.take() {
            if let Err(e) = workspace.remove().await {
                warn!("Failed to remove workspace {:?}: {}", ctx.identity.temp_dir, e);
            }
        }
    }

    /// Run `image` linked to a fresh database under the alias `postgres`.
    ///
    /// The linked container reaches the database on its internal port
    /// (5432) through the link, so no port is handed to `callback`. The
    /// linked container is stopped before the database is torn down.
    pub async fn with_linked_container<F, Fut, R, E>(
        &self,
        image: &str,
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

        let engine = Arc::clone(&self.engine);
        let image = ImageHandle::new(image);
        let extra_args = extra_args.to_vec();

        self.with_db(move |_port, database| async move {
            let run_args = linked_run_args(&database, &extra_args);
            let id = engine
                .run_detached(&image, &run_args, &[])
                .await
                .map_err(|source| {
                    E::from(SandboxError::Run {
                        image: image.to_string(),
                        source,
                    })
                })?;
            info!(container = %id.short(), image = %image, "Linked container started");
            let linked = ScopedContainer::new(Arc::clone(&engine), id, "linked");

            let outcome = AssertUnwindSafe(async move { callback().await })
                .catch_unwind()
                .await;

            if let Err(e) = linked.stop().await {
                warn!("Failed to stop linked container: {}", e);
            }
            match outcome {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
        .await
    }
}

fn is_single_path_component(value: &str) -> bool {
    let mut components = Path::new(value).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !value.contains(['/', '\\'])
}

/// `docker run` arguments for the database container.
pub fn database_run_args(port: &str, data_dir: &str) -> Vec<String> {
    vec![
        "-p".to_string(),
        format!("{port}:{INTERNAL_PORT}"),
        "-v".to_string(),
        format!("{data_dir}:{DATA_PATH}"),
    ]
}

/// `docker run` arguments for a container linked to the database.
pub fn linked_run_args(database: &ContainerId, extra_args: &[String]) -> Vec<String> {
    let mut args = vec![
        "--link".to_string(),
        format!("{}:{}", database, LINKED_ALIAS),
    ];
    args.extend(extra_args.iter().cloned());
    args
}
