//! Filesystem leaf actions.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::context::ActionContext;
use crate::core::task::{Action, TaskError};

fn io_failure(verb: &str, path: &Path, e: std::io::Error) -> TaskError {
    TaskError::ActionFailed(format!("failed to {} '{}': {}", verb, path.display(), e))
}

/// Creates a directory and any missing parents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkdirAction {
    path: PathBuf,
}

impl MkdirAction {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Action for MkdirAction {
    async fn execute(&self, ctx: &ActionContext) -> Result<(), TaskError> {
        let path = ctx.resolve_path(&self.path);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| io_failure("create directory", &path, e))?;
        debug!(path = %path.display(), "directory ready");
        Ok(())
    }

    fn description(&self) -> Option<String> {
        Some(format!("mkdir {}", self.path.display()))
    }
}

/// Removes everything inside a directory but keeps the directory itself.
///
/// A directory that does not exist is already clean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanAction {
    path: PathBuf,
}

impl CleanAction {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Action for CleanAction {
    async fn execute(&self, ctx: &ActionContext) -> Result<(), TaskError> {
        let dir = ctx.resolve_path(&self.path);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %dir.display(), "nothing to clean");
                return Ok(());
            }
            Err(e) => return Err(io_failure("read directory", &dir, e)),
        };

        let mut removed = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_failure("read directory", &dir, e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| io_failure("inspect", &path, e))?;
            let result = if file_type.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            result.map_err(|e| io_failure("remove", &path, e))?;
            removed += 1;
        }

        debug!(path = %dir.display(), removed, "directory cleaned");
        Ok(())
    }

    fn description(&self) -> Option<String> {
        Some(format!("clean {}", self.path.display()))
    }
}
