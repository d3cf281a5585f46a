//! Re-run a task when files change.
//!
//! [`FileWatcher`] polls modification times; [`watch_task`] drives a
//! [`Scheduler`] from it. Changes observed while a run is in progress are
//! picked up by the next poll, so runs never overlap and a burst of writes
//! triggers one run.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::core::task::TaskError;
use crate::core::types::TaskName;
use crate::scheduler::Scheduler;

/// Polls the modification time of a fixed set of paths.
///
/// A path that appears, disappears or gets a new mtime counts as changed.
#[derive(Debug, Clone)]
pub struct FileWatcher {
    interval: Duration,
    snapshot: HashMap<PathBuf, Option<SystemTime>>,
}

impl FileWatcher {
    /// Watch `paths`, recording their current state as the baseline.
    pub fn new<I, P>(paths: I, interval: Duration) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let snapshot = paths
            .into_iter()
            .map(Into::into)
            .map(|path| {
                let mtime = modified_at(&path);
                (path, mtime)
            })
            .collect();
        Self { interval, snapshot }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.snapshot.keys().map(PathBuf::as_path)
    }

    /// Compare against the last poll and return the paths that changed.
    pub fn poll(&mut self) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        for (path, last) in self.snapshot.iter_mut() {
            let current = modified_at(path);
            if current != *last {
                *last = current;
                changed.push(path.clone());
            }
        }
        changed.sort();
        changed
    }

    /// Wait until at least one path changes.
    pub async fn changed(&mut self) -> Vec<PathBuf> {
        loop {
            tokio::time::sleep(self.interval).await;
            let changed = self.poll();
            if !changed.is_empty() {
                return changed;
            }
        }
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Counters for a finished watch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub runs: usize,
    pub failures: usize,
}

/// Run `task` every time `watcher` reports a change, until `shutdown` resolves.
///
/// Each run is a fresh top-level invocation. Failed runs are logged and
/// counted; watching continues. A run in progress when `shutdown` resolves is
/// allowed to finish. Fails up front if `task` cannot be resolved.
pub async fn watch_task<F>(
    scheduler: &Scheduler,
    task: impl Into<TaskName>,
    mut watcher: FileWatcher,
    shutdown: F,
) -> Result<WatchStats, TaskError>
where
    F: Future<Output = ()>,
{
    let task = task.into();
    scheduler.registry().resolve(&task)?;

    info!(
        task = %task,
        paths = watcher.snapshot.len(),
        interval_ms = watcher.interval().as_millis() as u64,
        "watching for changes"
    );

    let mut stats = WatchStats::default();
    tokio::pin!(shutdown);
    loop {
        let changed = tokio::select! {
            _ = &mut shutdown => break,
            changed = watcher.changed() => changed,
        };
        debug!(changed = ?changed, "change detected");

        stats.runs += 1;
        match scheduler.run(task.clone()).await {
            Ok(()) => info!(task = %task, "watched run succeeded"),
            Err(e) => {
                stats.failures += 1;
                warn!(task = %task, error = %e, "watched run failed");
            }
        }
    }

    info!(runs = stats.runs, failures = stats.failures, "watch stopped");
    Ok(stats)
}
