//! Testing utilities for users of the gantry library.
//!
//! This module provides helpers for testing task graphs without real
//! processes:
//!
//! - [`CountingAction`]: counts invocations, optionally sleeps or fails
//! - [`OrderLog`]: actions that record when they start and finish
//! - [`RecordingHandler`]: collects lifecycle events
//! - [`TestHarness`]: a scheduler wired to in-memory sinks and a recorder

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::context::ActionContext;
use crate::core::registry::TaskRegistry;
use crate::core::task::{Action, TaskError};
use crate::events::{Event, EventBus, EventHandler};
use crate::execution::Supervisor;
use crate::output::{MemorySink, Multiplexer};
use crate::scheduler::Scheduler;

/// An action that counts how often it ran.
///
/// # Example
///
/// ```ignore
/// use gantry::testing::CountingAction;
///
/// let shared = CountingAction::new();
/// registry.leaf("shared", shared.clone())?;
/// // ... run ...
/// assert_eq!(shared.call_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct CountingAction {
    calls: AtomicUsize,
    delay: Option<Duration>,
    error: Option<String>,
}

impl CountingAction {
    /// An action that succeeds immediately.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An action that sleeps for `delay` before succeeding.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    /// An action that fails with `message` every time.
    pub fn failing(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            error: Some(message.into()),
            ..Self::default()
        })
    }

    /// An action that sleeps for `delay` and then fails with `message`.
    pub fn failing_after(delay: Duration, message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
            error: Some(message.into()),
        })
    }

    /// Number of times the action has started.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for CountingAction {
    async fn execute(&self, _ctx: &ActionContext) -> Result<(), TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.error {
            Some(message) => Err(TaskError::ActionFailed(message.clone())),
            None => Ok(()),
        }
    }
}

/// Shared log of action start and finish markers.
///
/// Each action created by [`OrderLog::action`] appends `"<label>:start"`
/// when it begins and `"<label>:end"` when it finishes.
#[derive(Debug, Clone, Default)]
pub struct OrderLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl OrderLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// An action logging under `label`, holding for `delay` between markers.
    pub fn action(&self, label: impl Into<String>, delay: Duration) -> Arc<dyn Action> {
        Arc::new(LoggingAction {
            label: label.into(),
            delay,
            log: self.clone(),
        })
    }

    pub async fn entries(&self) -> Vec<String> {
        self.entries.lock().await.clone()
    }

    /// Position of `entry` in the log, if present.
    pub async fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().await.iter().position(|e| e == entry)
    }

    async fn push(&self, entry: String) {
        self.entries.lock().await.push(entry);
    }
}

struct LoggingAction {
    label: String,
    delay: Duration,
    log: OrderLog,
}

#[async_trait]
impl Action for LoggingAction {
    async fn execute(&self, _ctx: &ActionContext) -> Result<(), TaskError> {
        self.log.push(format!("{}:start", self.label)).await;
        tokio::time::sleep(self.delay).await;
        self.log.push(format!("{}:end", self.label)).await;
        Ok(())
    }
}

/// Event handler that records every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Names of tasks that emitted `TaskStarted`, in order.
    pub async fn started_tasks(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::TaskStarted { task, .. } => Some(task.to_string()),
                _ => None,
            })
            .collect()
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// A scheduler harness with captured output and recorded events.
///
/// # Example
///
/// ```ignore
/// use gantry::testing::TestHarness;
///
/// let harness = TestHarness::new().await;
/// let scheduler = harness.scheduler(registry);
/// scheduler.run("build").await?;
/// assert!(harness.stdout_lines().await.contains(&"cargo: done".to_string()));
/// ```
pub struct TestHarness {
    stdout: MemorySink,
    stderr: MemorySink,
    supervisor: Supervisor,
    events: Arc<EventBus>,
    recorder: Arc<RecordingHandler>,
}

impl TestHarness {
    /// Create a harness. Must be called inside a tokio runtime.
    pub async fn new() -> Self {
        let stdout = MemorySink::new();
        let stderr = MemorySink::new();
        let supervisor = Supervisor::new(Multiplexer::new(stdout.clone(), stderr.clone()));
        let events = Arc::new(EventBus::new());
        let recorder = Arc::new(RecordingHandler::new());
        events.register(recorder.clone()).await;
        Self {
            stdout,
            stderr,
            supervisor,
            events,
            recorder,
        }
    }

    /// Create a harness whose processes run in `dir`.
    pub async fn in_dir(dir: impl Into<std::path::PathBuf>) -> Self {
        let mut harness = Self::new().await;
        harness.supervisor = harness.supervisor.with_working_dir(dir);
        harness
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// A scheduler over `registry` reporting to this harness.
    pub fn scheduler(&self, registry: TaskRegistry) -> Scheduler {
        Scheduler::new(registry, self.supervisor.clone()).with_event_bus(Arc::clone(&self.events))
    }

    pub fn recorder(&self) -> &RecordingHandler {
        &self.recorder
    }

    pub async fn events(&self) -> Vec<Event> {
        self.recorder.events().await
    }

    /// Captured stdout lines, after flushing pending frames.
    pub async fn stdout_lines(&self) -> Vec<String> {
        self.supervisor.output().flush().await;
        self.stdout.lines()
    }

    /// Captured stderr lines, after flushing pending frames.
    pub async fn stderr_lines(&self) -> Vec<String> {
        self.supervisor.output().flush().await;
        self.stderr.lines()
    }
}
