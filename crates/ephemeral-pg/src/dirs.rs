//! Per-invocation working directory stack.
//!
//! The process cwd is shared by every task, so concurrent sandboxes must not
//! touch it. Each run instead carries a `DirStack` and passes `cwd()` to the
//! commands it launches. The bottom entry is the caller's directory and is
//! never popped.

use std::path::{Path, PathBuf};

use crate::error::SandboxResult;

#[derive(Debug, Clone)]
pub struct DirStack {
    stack: Vec<PathBuf>,
}

impl DirStack {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            stack: vec![base.into()],
        }
    }

    /// Stack rooted at the process's current directory.
    pub fn current() -> SandboxResult<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn cwd(&self) -> &Path {
        // `stack` always holds the base entry.
        self.stack.last().map(PathBuf::as_path).unwrap_or(Path::new("."))
    }

    /// The directory the stack was created with.
    pub fn base(&self) -> &Path {
        &self.stack[0]
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Enter `path`, relative to the current directory unless absolute.
    pub fn push(&mut self, path: impl AsRef<Path>) -> &Path {
        let next = self.cwd().join(path);
        self.stack.push(next);
        self.cwd()
    }

    /// Leave the current directory. The base entry stays.
    pub fn pop(&mut self) -> Option<PathBuf> {
        if self.stack.len() > 1 {
            self.stack.pop()
        } else {
            None
        }
    }

    /// Return to the base directory.
    pub fn reset(&mut self) {
        self.stack.truncate(1);
    }

    /// Enter `path` until the returned guard is dropped.
    pub fn enter(&mut self, path: impl AsRef<Path>) -> DirGuard<'_> {
        let depth = self.depth();
        self.push(path);
        DirGuard { stack: self, depth }
    }
}

/// Restores the stack to its previous depth on drop.
#[derive(Debug)]
pub struct DirGuard<'a> {
    stack: &'a mut DirStack,
    depth: usize,
}

impl DirGuard<'_> {
    pub fn cwd(&self) -> &Path {
        self.stack.cwd()
    }
}

impl Drop for DirGuard<'_> {
    fn drop(&mut self) {
        self.stack.stack.truncate(self.depth);
    }
}
