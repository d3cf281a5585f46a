//! Build files loaded from disk and executed.

use crate::common::write_build_file;
use gantry::testing::TestHarness;
use gantry::{ConfigError, TaskError, TaskKind, load_build_plan};

#[tokio::test]
async fn test_directory_tasks_from_build_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("out/stale")).unwrap();
    std::fs::write(dir.path().join("out/stale/old.txt"), "old").unwrap();
    std::fs::write(dir.path().join("out/old.txt"), "old").unwrap();

    let path = write_build_file(
        dir.path(),
        r#"
tasks:
  - id: clean
    type: clean
    path: out
  - id: dirs
    type: parallel
    tasks:
      - type: mkdir
        path: out/bible
      - type: mkdir
        path: out/votd
  - id: default
    type: sequence
    tasks: [clean, dirs]
"#,
    );

    let plan = load_build_plan(&path).unwrap();
    assert_eq!(plan.working_dir, dir.path());
    assert_eq!(plan.default_task.as_str(), "default");

    let harness = TestHarness::in_dir(&plan.working_dir).await;
    harness
        .scheduler(plan.registry.clone())
        .run(plan.default_task.clone())
        .await
        .unwrap();

    let out = dir.path().join("out");
    assert!(out.is_dir());
    assert!(!out.join("old.txt").exists());
    assert!(!out.join("stale").exists());
    assert!(out.join("bible").is_dir());
    assert!(out.join("votd").is_dir());
}

#[cfg(unix)]
#[tokio::test]
async fn test_commands_services_and_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_build_file(
        dir.path(),
        r#"
environment:
  GREETING: hello
tasks:
  - id: greet
    type: command
    command: echo $GREETING $TARGET
    shell: true
    display_name: greeter
    environment:
      TARGET: world
  - id: served
    type: command
    command: echo client done
    shell: true
    display_name: client
    service:
      command: sleep
      args: ["30"]
      display_name: server
  - id: default
    type: sequence
    tasks: [greet, served]
"#,
    );

    let plan = load_build_plan(&path).unwrap();
    let harness = TestHarness::in_dir(&plan.working_dir).await;
    let started = std::time::Instant::now();
    harness
        .scheduler(plan.registry.clone())
        .run("default")
        .await
        .unwrap();

    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    let lines = harness.stdout_lines().await;
    assert!(lines.contains(&"greeter: hello world".to_string()));
    assert!(lines.contains(&"client: client done".to_string()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_failing_command_reports_path_and_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_build_file(
        dir.path(),
        r#"
tasks:
  - id: test
    type: parallel
    tasks:
      - id: unit
        type: command
        command: exit 3
        shell: true
      - id: lint
        type: command
        command: "true"
"#,
    );

    let plan = load_build_plan(&path).unwrap();
    let harness = TestHarness::in_dir(&plan.working_dir).await;
    let err = harness
        .scheduler(plan.registry)
        .run("test")
        .await
        .unwrap_err();

    let task_path: Vec<&str> = err.task_path().iter().map(|n| n.as_str()).collect();
    assert_eq!(task_path, vec!["test", "unit"]);
    assert_eq!(err.exit_code(), Some(3));
}

#[tokio::test]
async fn test_dangling_reference_fails_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_build_file(
        dir.path(),
        r#"
tasks:
  - id: dirs
    type: mkdir
    path: created
  - id: default
    type: sequence
    tasks: [dirs, missing]
"#,
    );

    let plan = load_build_plan(&path).unwrap();
    assert_eq!(plan.registry.get("default").unwrap().kind(), TaskKind::Sequence);
    assert!(plan.registry.validate().is_err());

    let harness = TestHarness::in_dir(&plan.working_dir).await;
    let err = harness
        .scheduler(plan.registry)
        .run("default")
        .await
        .unwrap_err();

    assert!(matches!(err, TaskError::InvalidDefinition { .. }));
    assert!(!dir.path().join("created").exists());
    assert!(harness.events().await.is_empty());
}

#[test]
fn test_missing_build_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_build_plan(dir.path().join("nope.yaml")).err().unwrap();
    assert!(matches!(err, ConfigError::FileReadError { .. }));
}

#[test]
fn test_watch_rules_resolve_against_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_build_file(
        dir.path(),
        r#"
working_dir: site
tasks:
  - id: build
    type: mkdir
    path: out
watch:
  - task: build
    paths: [src/index.html]
    interval_ms: 50
"#,
    );

    let plan = load_build_plan(&path).unwrap();
    let site = dir.path().join("site");
    assert_eq!(plan.working_dir, site);
    assert_eq!(plan.watches.len(), 1);
    assert_eq!(plan.watches[0].paths, vec![site.join("src/index.html")]);
    assert_eq!(
        plan.watches[0].interval,
        std::time::Duration::from_millis(50)
    );
}
