//! Watch loops re-running tasks on file changes.

use crate::common::{touch, wait_until};
use gantry::testing::{CountingAction, TestHarness};
use gantry::{FileWatcher, TaskError, TaskRegistry, watch_task};
use std::time::Duration;
use tokio::sync::oneshot;

const POLL: Duration = Duration::from_millis(20);

#[tokio::test]
async fn test_change_triggers_run_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("index.html");
    std::fs::write(&source, "v0").unwrap();

    let harness = TestHarness::new().await;
    let build = CountingAction::new();
    let mut registry = TaskRegistry::new();
    registry.leaf("build", build.clone()).unwrap();
    let scheduler = harness.scheduler(registry);

    let watcher = FileWatcher::new([source.clone()], POLL);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let loop_handle = tokio::spawn(async move {
        watch_task(&scheduler, "build", watcher, async move {
            let _ = stop_rx.await;
        })
        .await
    });

    tokio::time::sleep(POLL * 3).await;
    assert_eq!(build.call_count(), 0);

    touch(&source, 5);
    let counter = build.clone();
    wait_until(|| counter.call_count() >= 1, Duration::from_secs(5), "first run").await;

    touch(&source, 10);
    let counter = build.clone();
    wait_until(|| counter.call_count() >= 2, Duration::from_secs(5), "second run").await;

    stop_tx.send(()).unwrap();
    let stats = loop_handle.await.unwrap().unwrap();
    assert_eq!(stats.runs, build.call_count());
    assert_eq!(stats.failures, 0);
}

#[tokio::test]
async fn test_failed_runs_keep_watching() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("app.js");
    std::fs::write(&source, "v0").unwrap();

    let harness = TestHarness::new().await;
    let broken = CountingAction::failing("syntax error");
    let mut registry = TaskRegistry::new();
    registry.leaf("bundle", broken.clone()).unwrap();
    registry.sequence("rebuild", ["bundle"]).unwrap();
    let scheduler = harness.scheduler(registry);

    let watcher = FileWatcher::new([source.clone()], POLL);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let loop_handle = tokio::spawn(async move {
        watch_task(&scheduler, "rebuild", watcher, async move {
            let _ = stop_rx.await;
        })
        .await
    });

    touch(&source, 5);
    let counter = broken.clone();
    wait_until(|| counter.call_count() >= 1, Duration::from_secs(5), "first run").await;
    touch(&source, 10);
    let counter = broken.clone();
    wait_until(|| counter.call_count() >= 2, Duration::from_secs(5), "second run").await;

    stop_tx.send(()).unwrap();
    let stats = loop_handle.await.unwrap().unwrap();
    assert_eq!(stats.runs, stats.failures);
    assert!(stats.failures >= 2);
}

#[tokio::test]
async fn test_created_file_counts_as_change() {
    let dir = tempfile::tempdir().unwrap();
    let later = dir.path().join("generated.css");

    let harness = TestHarness::new().await;
    let build = CountingAction::new();
    let mut registry = TaskRegistry::new();
    registry.leaf("styles", build.clone()).unwrap();
    let scheduler = harness.scheduler(registry);

    let watcher = FileWatcher::new([later.clone()], POLL);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let loop_handle = tokio::spawn(async move {
        watch_task(&scheduler, "styles", watcher, async move {
            let _ = stop_rx.await;
        })
        .await
    });

    std::fs::write(&later, "body {}").unwrap();
    let counter = build.clone();
    wait_until(|| counter.call_count() >= 1, Duration::from_secs(5), "run").await;

    stop_tx.send(()).unwrap();
    assert_eq!(loop_handle.await.unwrap().unwrap().runs, 1);
}

#[tokio::test]
async fn test_unknown_task_fails_immediately() {
    let harness = TestHarness::new().await;
    let scheduler = harness.scheduler(TaskRegistry::new());
    let watcher = FileWatcher::new(Vec::<std::path::PathBuf>::new(), POLL);

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        watch_task(&scheduler, "missing", watcher, std::future::pending::<()>()),
    )
    .await
    .expect("watch_task should return without waiting");

    assert!(matches!(result, Err(TaskError::UnknownTask { .. })));
}
