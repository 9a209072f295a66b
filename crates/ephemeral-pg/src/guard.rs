//! Scope-bound resources: running containers and the temp workspace.
//!
//! Both types expect an explicit async release (`stop` / `remove`) on the
//! normal path. Their `Drop` impls cover the case where the owning future
//! is dropped before it gets there.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use container_engine::{ContainerEngine, ContainerId, EngineResult};
use tracing::{debug, warn};

/// A running container that is stopped when the scope ends.
pub struct ScopedContainer {
    engine: Arc<dyn ContainerEngine>,
    id: ContainerId,
    label: &'static str,
    released: bool,
}

impl std::fmt::Debug for ScopedContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedContainer")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("released", &self.released)
            .finish()
    }
}

impl ScopedContainer {
    pub fn new(engine: Arc<dyn ContainerEngine>, id: ContainerId, label: &'static str) -> Self {
        Self {
            engine,
            id,
            label,
            released: false,
        }
    }

    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Stop and remove the container.
    ///
    /// The guard stays armed until the engine call returns, so a stop that
    /// is cancelled midway still falls back to the background stop.
    pub async fn stop(mut self) -> EngineResult<()> {
        debug!("Stopping {} container {}", self.label, self.id.short());
        let result = self.engine.stop(&self.id).await;
        self.released = true;
        result
    }
}

impl Drop for ScopedContainer {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let engine = Arc::clone(&self.engine);
        let id = self.id.clone();
        let label = self.label;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    "{} container {} dropped without stop; stopping in background",
                    label,
                    id.short()
                );
                handle.spawn(async move {
                    if let Err(e) = engine.stop(&id).await {
                        warn!("Background stop of {} container {} failed: {}", label, id, e);
                    }
                });
            }
            Err(_) => {
                warn!(
                    "{} container {} dropped outside a tokio runtime and was not stopped",
                    label, id
                );
            }
        }
    }
}

/// The per-invocation scratch directory, deleted recursively on release.
#[derive(Debug)]
pub struct TempWorkspace {
    path: PathBuf,
    released: bool,
}

impl TempWorkspace {
    /// Create `path` and any missing parents.
    pub async fn create(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory tree. Already gone counts as success.
    pub async fn remove(mut self) -> std::io::Result<()> {
        let result = match tokio::fs::remove_dir_all(&self.path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        };
        self.released = true;
        result
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove workspace {:?}: {}", self.path, e);
            }
        }
    }
}
