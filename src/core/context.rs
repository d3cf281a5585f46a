//! Execution context handed to leaf actions.
//!
//! Every leaf in a run shares one [`ProcessTable`], so a task that starts a
//! long-lived process can leave its handle behind for a later task to stop.
//! The table lives for exactly one top-level run; a re-run starts empty.
//! Processes still registered when the table is dropped are terminated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::types::{RunId, TaskName};
use crate::execution::{ProcessHandle, Supervisor};

/// Process handles registered by tasks during a run, keyed by name.
#[derive(Clone, Default)]
pub struct ProcessTable {
    inner: Arc<Mutex<HashMap<String, ProcessHandle>>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle. Returns the handle previously stored under `key`.
    pub fn insert(&self, key: impl Into<String>, handle: ProcessHandle) -> Option<ProcessHandle> {
        self.lock().insert(key.into(), handle)
    }

    pub fn get(&self, key: &str) -> Option<ProcessHandle> {
        self.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<ProcessHandle> {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProcessHandle>> {
        // A panic while holding this lock cannot leave the map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Context passed to [`Action::execute`](super::task::Action::execute).
///
/// Cheap to clone: everything inside is shared.
#[derive(Clone)]
pub struct ActionContext {
    task: TaskName,
    run_id: RunId,
    supervisor: Supervisor,
    processes: ProcessTable,
}

impl ActionContext {
    pub fn new(
        task: TaskName,
        run_id: RunId,
        supervisor: Supervisor,
        processes: ProcessTable,
    ) -> Self {
        Self {
            task,
            run_id,
            supervisor,
            processes,
        }
    }

    /// Name of the task this action runs for.
    pub fn task(&self) -> &TaskName {
        &self.task
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Supervisor used to spawn external processes.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Processes registered by tasks of the current run.
    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// Resolve a path against the supervisor's working directory.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        match self.supervisor.working_dir() {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}
