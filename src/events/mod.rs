//! Lifecycle events and event handling.
//!
//! The scheduler emits an event for every run and task transition. Handlers
//! registered on an [`EventBus`] receive them in emission order.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::task::TaskKind;
use crate::core::types::{RunId, TaskName};

/// Lifecycle events emitted during a run.
#[derive(Debug, Clone)]
pub enum Event {
    /// A top-level run has started.
    RunStarted {
        run_id: RunId,
        task: TaskName,
        timestamp: Instant,
    },

    /// A top-level run finished.
    RunCompleted {
        run_id: RunId,
        task: TaskName,
        success: bool,
        duration: Duration,
        timestamp: Instant,
    },

    /// A task has started execution.
    TaskStarted {
        run_id: RunId,
        task: TaskName,
        kind: TaskKind,
        timestamp: Instant,
    },

    /// A task completed successfully.
    TaskSucceeded {
        run_id: RunId,
        task: TaskName,
        duration: Duration,
        timestamp: Instant,
    },

    /// A task failed.
    TaskFailed {
        run_id: RunId,
        task: TaskName,
        error: String,
        /// Exit code of the failing process, when a process caused it.
        exit_code: Option<i32>,
        duration: Duration,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::RunStarted { timestamp, .. } => *timestamp,
            Event::RunCompleted { timestamp, .. } => *timestamp,
            Event::TaskStarted { timestamp, .. } => *timestamp,
            Event::TaskSucceeded { timestamp, .. } => *timestamp,
            Event::TaskFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Run the event belongs to.
    pub fn run_id(&self) -> RunId {
        match self {
            Event::RunStarted { run_id, .. }
            | Event::RunCompleted { run_id, .. }
            | Event::TaskStarted { run_id, .. }
            | Event::TaskSucceeded { run_id, .. }
            | Event::TaskFailed { run_id, .. } => *run_id,
        }
    }

    /// Task the event is about. For run events, the requested task.
    pub fn task(&self) -> &TaskName {
        match self {
            Event::RunStarted { task, .. }
            | Event::RunCompleted { task, .. }
            | Event::TaskStarted { task, .. }
            | Event::TaskSucceeded { task, .. }
            | Event::TaskFailed { task, .. } => task,
        }
    }

    /// Create a RunStarted event.
    pub fn run_started(run_id: RunId, task: TaskName) -> Self {
        Event::RunStarted {
            run_id,
            task,
            timestamp: Instant::now(),
        }
    }

    /// Create a RunCompleted event.
    pub fn run_completed(run_id: RunId, task: TaskName, success: bool, duration: Duration) -> Self {
        Event::RunCompleted {
            run_id,
            task,
            success,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskStarted event.
    pub fn task_started(run_id: RunId, task: TaskName, kind: TaskKind) -> Self {
        Event::TaskStarted {
            run_id,
            task,
            kind,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskSucceeded event.
    pub fn task_succeeded(run_id: RunId, task: TaskName, duration: Duration) -> Self {
        Event::TaskSucceeded {
            run_id,
            task,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFailed event.
    pub fn task_failed(
        run_id: RunId,
        task: TaskName,
        error: String,
        exit_code: Option<i32>,
        duration: Duration,
    ) -> Self {
        Event::TaskFailed {
            run_id,
            task,
            error,
            exit_code,
            duration,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
