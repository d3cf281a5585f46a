//! Task graph behavior through the public API.

use gantry::testing::{CountingAction, OrderLog, TestHarness};
use gantry::{Event, ExecutionState, TaskError, TaskRegistry};
use std::time::Duration;

#[tokio::test]
async fn test_sequence_failure_stops_later_children() {
    let harness = TestHarness::new().await;
    let first = CountingAction::new();
    let broken = CountingAction::failing("compile error");
    let third = CountingAction::new();
    let fourth = CountingAction::new();

    let mut registry = TaskRegistry::new();
    registry.leaf("first", first.clone()).unwrap();
    registry.leaf("broken", broken.clone()).unwrap();
    registry.leaf("third", third.clone()).unwrap();
    registry.leaf("fourth", fourth.clone()).unwrap();
    registry
        .sequence("build", ["first", "broken", "third", "fourth"])
        .unwrap();

    let report = harness.scheduler(registry).execute("build").await.unwrap();

    assert!(!report.is_success());
    assert_eq!(first.call_count(), 1);
    assert_eq!(broken.call_count(), 1);
    assert_eq!(third.call_count(), 0);
    assert_eq!(fourth.call_count(), 0);
    assert_eq!(report.state_of("third"), Some(ExecutionState::Pending));
    assert_eq!(
        harness.recorder().started_tasks().await,
        vec!["build", "first", "broken"]
    );
}

#[tokio::test]
async fn test_parallel_completes_after_every_child() {
    let harness = TestHarness::new().await;
    let log = OrderLog::new();

    let mut registry = TaskRegistry::new();
    registry
        .leaf("fast", log.action("fast", Duration::from_millis(20)))
        .unwrap();
    registry
        .leaf("slow", log.action("slow", Duration::from_millis(80)))
        .unwrap();
    registry
        .leaf("medium", log.action("medium", Duration::from_millis(30)))
        .unwrap();
    registry
        .parallel("assets", ["fast", "slow", "medium"])
        .unwrap();

    let report = harness.scheduler(registry).execute("assets").await.unwrap();

    assert!(report.is_success());
    let entries = log.entries().await;
    assert_eq!(entries.len(), 6);
    for label in ["fast", "slow", "medium"] {
        assert!(entries.contains(&format!("{label}:end")));
    }
    // All children started before any of them finished.
    let last_start = entries.iter().rposition(|e| e.ends_with(":start")).unwrap();
    let first_end = entries.iter().position(|e| e.ends_with(":end")).unwrap();
    assert!(last_start < first_end);
    assert_eq!(report.count(ExecutionState::Succeeded), 4);
}

#[tokio::test]
async fn test_parallel_failure_waits_for_siblings() {
    let harness = TestHarness::new().await;
    let quick_failure = CountingAction::failing("lint failed");
    let slow_success = CountingAction::with_delay(Duration::from_millis(100));
    let slow_failure = CountingAction::failing_after(Duration::from_millis(60), "tests failed");

    let mut registry = TaskRegistry::new();
    registry.leaf("lint", quick_failure.clone()).unwrap();
    registry.leaf("bundle", slow_success.clone()).unwrap();
    registry.leaf("test", slow_failure.clone()).unwrap();
    registry.parallel("check", ["lint", "bundle", "test"]).unwrap();

    let report = harness.scheduler(registry).execute("check").await.unwrap();

    assert!(!report.is_success());
    assert_eq!(slow_success.call_count(), 1);
    assert_eq!(slow_failure.call_count(), 1);
    for child in ["lint", "bundle", "test"] {
        let state = report.state_of(child).unwrap();
        assert!(state.is_terminal(), "{child} ended as {state}");
    }
    assert_eq!(report.state_of("bundle"), Some(ExecutionState::Succeeded));

    // First failure by completion order is reported.
    let err = report.into_result().unwrap_err();
    let path: Vec<&str> = err.task_path().iter().map(|n| n.as_str()).collect();
    assert_eq!(path, vec!["check", "lint"]);
    assert!(matches!(err.root_cause(), TaskError::ActionFailed(m) if m == "lint failed"));
}

#[tokio::test]
async fn test_shared_child_executes_once_across_branches() {
    let harness = TestHarness::new().await;
    let resources = CountingAction::with_delay(Duration::from_millis(30));

    let mut registry = TaskRegistry::new();
    registry.leaf("bible_resources", resources.clone()).unwrap();
    registry.leaf("node_tests", CountingAction::new()).unwrap();
    registry.leaf("phantom_tests", CountingAction::new()).unwrap();
    registry
        .sequence("node", ["bible_resources", "node_tests"])
        .unwrap();
    registry
        .sequence("phantom", ["bible_resources", "phantom_tests"])
        .unwrap();
    registry.parallel("all_tests", ["node", "phantom"]).unwrap();

    let scheduler = harness.scheduler(registry);
    scheduler.run("all_tests").await.unwrap();

    assert_eq!(resources.call_count(), 1);
    let started = harness.recorder().started_tasks().await;
    assert_eq!(
        started.iter().filter(|t| *t == "bible_resources").count(),
        1
    );
}

#[tokio::test]
async fn test_shared_failure_reaches_both_parents() {
    let harness = TestHarness::new().await;
    let broken = CountingAction::failing("missing resources");

    let mut registry = TaskRegistry::new();
    registry.leaf("resources", broken.clone()).unwrap();
    registry.sequence("left", ["resources"]).unwrap();
    registry.sequence("right", ["resources"]).unwrap();
    registry.parallel("both", ["left", "right"]).unwrap();

    let report = harness.scheduler(registry).execute("both").await.unwrap();

    assert_eq!(broken.call_count(), 1);
    assert_eq!(report.state_of("left"), Some(ExecutionState::Failed));
    assert_eq!(report.state_of("right"), Some(ExecutionState::Failed));
}

#[tokio::test]
async fn test_unknown_task_has_no_side_effects() {
    let harness = TestHarness::new().await;
    let action = CountingAction::new();
    let mut registry = TaskRegistry::new();
    registry.leaf("build", action.clone()).unwrap();

    let err = harness
        .scheduler(registry)
        .run("doesNotExist")
        .await
        .unwrap_err();

    match err {
        TaskError::UnknownTask { name } => assert_eq!(name.as_str(), "doesNotExist"),
        other => panic!("Expected UnknownTask, got {:?}", other),
    }
    assert_eq!(action.call_count(), 0);
    assert!(harness.events().await.is_empty());
    assert!(harness.stdout_lines().await.is_empty());
}

#[tokio::test]
async fn test_declaration_order_is_free() {
    let harness = TestHarness::new().await;
    let leaf = CountingAction::new();

    let mut registry = TaskRegistry::new();
    registry.sequence("default", ["build"]).unwrap();
    registry.parallel("build", ["compile"]).unwrap();
    registry.leaf("compile", leaf.clone()).unwrap();

    harness.scheduler(registry).run("default").await.unwrap();
    assert_eq!(leaf.call_count(), 1);
}

#[tokio::test]
async fn test_events_follow_task_lifecycle() {
    let harness = TestHarness::new().await;
    let mut registry = TaskRegistry::new();
    registry.leaf("a", CountingAction::new()).unwrap();
    registry.leaf("b", CountingAction::failing("nope")).unwrap();
    registry.sequence("ab", ["a", "b"]).unwrap();

    let report = harness.scheduler(registry).execute("ab").await.unwrap();
    let events = harness.events().await;

    let kinds: Vec<String> = events
        .iter()
        .map(|e| match e {
            Event::RunStarted { .. } => "run_started".to_string(),
            Event::RunCompleted { success, .. } => format!("run_completed:{success}"),
            Event::TaskStarted { task, .. } => format!("started:{task}"),
            Event::TaskSucceeded { task, .. } => format!("succeeded:{task}"),
            Event::TaskFailed { task, .. } => format!("failed:{task}"),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "run_started",
            "started:ab",
            "started:a",
            "succeeded:a",
            "started:b",
            "failed:b",
            "failed:ab",
            "run_completed:false",
        ]
    );
    assert!(events.iter().all(|e| e.run_id() == report.run_id));
}
