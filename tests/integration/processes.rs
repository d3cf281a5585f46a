//! Real processes driven through the scheduler.

#![cfg(unix)]

use crate::common::wait_until;
use gantry::testing::TestHarness;
use gantry::{
    CommandAction, ExecutionState, ProcessState, StartAction, StopAction, TaskError, TaskRegistry,
    action_fn,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn sh(name: &str, script: &str) -> CommandAction {
    CommandAction::builder(script)
        .display_name(name)
        .shell(true)
        .build()
}

#[tokio::test]
async fn test_exit_codes_map_to_completion() {
    let harness = TestHarness::new().await;
    let mut registry = TaskRegistry::new();
    registry
        .leaf("ok", Arc::new(CommandAction::builder("true").build()))
        .unwrap();
    registry
        .leaf("bad", Arc::new(sh("bad", "exit 2")))
        .unwrap();
    registry
        .leaf(
            "missing",
            Arc::new(CommandAction::builder("/definitely/not/a/binary").build()),
        )
        .unwrap();
    let scheduler = harness.scheduler(registry);

    scheduler.run("ok").await.unwrap();

    let err = scheduler.run("bad").await.unwrap_err();
    assert_eq!(err.exit_code(), Some(2));
    match err.root_cause() {
        TaskError::ProcessFailed { name, code } => {
            assert_eq!(name, "bad");
            assert_eq!(*code, 2);
        }
        other => panic!("Expected ProcessFailed, got {:?}", other),
    }

    let err = scheduler.run("missing").await.unwrap_err();
    assert!(matches!(err.root_cause(), TaskError::SpawnError { .. }));
    assert_eq!(err.exit_code(), None);
}

#[tokio::test]
async fn test_started_process_is_stopped_by_later_task() {
    let harness = TestHarness::new().await;
    let observed: Arc<Mutex<Option<ProcessState>>> = Arc::new(Mutex::new(None));

    let mut registry = TaskRegistry::new();
    registry
        .leaf(
            "serve",
            Arc::new(StartAction::new(
                gantry::ProcessSpec::new("server", "sleep").arg("30"),
            )),
        )
        .unwrap();
    registry
        .leaf("work", Arc::new(sh("work", "echo working")))
        .unwrap();
    let slot = Arc::clone(&observed);
    registry
        .leaf(
            "shutdown",
            action_fn(move |ctx| {
                let slot = Arc::clone(&slot);
                async move {
                    let Some(handle) = ctx.processes().remove("serve") else {
                        return Err(TaskError::ActionFailed("server handle missing".to_string()));
                    };
                    let state = handle.stop().await;
                    *slot.lock().unwrap() = Some(state);
                    Ok(())
                }
            }),
        )
        .unwrap();
    registry
        .sequence("default", ["serve", "work", "shutdown"])
        .unwrap();

    let started = std::time::Instant::now();
    harness.scheduler(registry).run("default").await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(*observed.lock().unwrap(), Some(ProcessState::Terminated));
    assert!(
        harness
            .stdout_lines()
            .await
            .contains(&"work: working".to_string())
    );
}

#[tokio::test]
async fn test_stop_action_targets_started_process() {
    let harness = TestHarness::new().await;
    let mut registry = TaskRegistry::new();
    registry
        .leaf(
            "watcher",
            Arc::new(
                StartAction::new(gantry::ProcessSpec::new("watcher", "sleep").arg("30"))
                    .with_key("bg"),
            ),
        )
        .unwrap();
    registry
        .leaf("stop_watcher", Arc::new(StopAction::new("bg")))
        .unwrap();
    registry
        .leaf("stop_again", Arc::new(StopAction::new("bg")))
        .unwrap();
    registry
        .sequence("ok", ["watcher", "stop_watcher"])
        .unwrap();
    registry
        .sequence("twice", ["watcher", "stop_watcher", "stop_again"])
        .unwrap();
    let scheduler = harness.scheduler(registry);

    scheduler.run("ok").await.unwrap();

    let report = scheduler.execute("twice").await.unwrap();
    assert_eq!(report.state_of("stop_watcher"), Some(ExecutionState::Succeeded));
    assert_eq!(report.state_of("stop_again"), Some(ExecutionState::Failed));
    let err = report.into_result().unwrap_err();
    assert!(err.root_cause().to_string().contains("bg"));
}

#[tokio::test]
async fn test_parallel_processes_never_mix_lines() {
    let harness = TestHarness::new().await;
    let mut registry = TaskRegistry::new();
    for name in ["alpha", "beta", "gamma"] {
        let script = format!(
            "i=0; while [ $i -lt 50 ]; do echo line-$i-{name}-end; i=$((i+1)); done"
        );
        registry.leaf(name, Arc::new(sh(name, &script))).unwrap();
    }
    registry
        .parallel("chatty", ["alpha", "beta", "gamma"])
        .unwrap();

    harness.scheduler(registry).run("chatty").await.unwrap();

    let lines = harness.stdout_lines().await;
    assert_eq!(lines.len(), 150);
    for line in &lines {
        let (prefix, text) = line.split_once(": ").unwrap();
        assert!(text.starts_with("line-"), "mangled line {line:?}");
        assert!(text.ends_with(&format!("-{prefix}-end")), "mixed line {line:?}");
    }
    for name in ["alpha", "beta", "gamma"] {
        let own: Vec<&String> = lines
            .iter()
            .filter(|l| l.starts_with(&format!("{name}: ")))
            .collect();
        assert_eq!(own.len(), 50);
        assert_eq!(own[0], &format!("{name}: line-0-{name}-end"));
        assert_eq!(own[49], &format!("{name}: line-49-{name}-end"));
    }
}

#[tokio::test]
async fn test_stderr_goes_to_its_own_sink() {
    let harness = TestHarness::new().await;
    let mut registry = TaskRegistry::new();
    registry
        .leaf("warn", Arc::new(sh("lint", "echo fine; echo careful >&2")))
        .unwrap();

    harness.scheduler(registry).run("warn").await.unwrap();

    assert_eq!(harness.stdout_lines().await, vec!["lint: fine"]);
    assert_eq!(harness.stderr_lines().await, vec!["lint: careful"]);
}

fn pid_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

#[tokio::test]
async fn test_failed_run_releases_started_process() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("server.pid");
    let harness = TestHarness::new().await;
    let server_pid: Arc<Mutex<Option<i32>>> = Arc::new(Mutex::new(None));

    let mut registry = TaskRegistry::new();
    registry
        .leaf(
            "serve",
            Arc::new(StartAction::new(gantry::ProcessSpec::new("server", "sh").args([
                "-c".to_string(),
                format!("echo $$ > {}; exec sleep 30", pidfile.display()),
            ]))),
        )
        .unwrap();
    let (file, slot) = (pidfile.clone(), Arc::clone(&server_pid));
    registry
        .leaf(
            "tests",
            action_fn(move |_ctx| {
                let (file, slot) = (file.clone(), Arc::clone(&slot));
                async move {
                    for _ in 0..500 {
                        let pid = std::fs::read_to_string(&file)
                            .ok()
                            .and_then(|s| s.trim().parse::<i32>().ok());
                        if let Some(pid) = pid {
                            *slot.lock().unwrap() = Some(pid);
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Err(TaskError::ActionFailed("tests failed".to_string()))
                }
            }),
        )
        .unwrap();
    registry.leaf("stop", Arc::new(StopAction::new("serve"))).unwrap();
    registry
        .sequence("run_tests", ["serve", "tests", "stop"])
        .unwrap();
    let scheduler = harness.scheduler(registry);

    for _ in 0..3 {
        let _ = std::fs::remove_file(&pidfile);
        *server_pid.lock().unwrap() = None;

        let report = scheduler.execute("run_tests").await.unwrap();
        assert!(!report.is_success());
        assert_eq!(report.state_of("stop"), Some(ExecutionState::Pending));

        let pid = server_pid.lock().unwrap().expect("server never wrote its pid");
        wait_until(|| !pid_alive(pid), Duration::from_secs(5), "server to exit").await;
    }
}
