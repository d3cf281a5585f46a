//! Scheduler type definitions.
//!
//! A [`RunReport`] describes one top-level run: which tasks were reached,
//! how each ended, and the overall completion.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::core::task::{TaskError, TaskKind};
use crate::core::types::{RunId, TaskName};

/// Completion of a task or a whole run.
pub type Completion = Result<(), TaskError>;

/// Execution state of one task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Part of the run's closure but never started.
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Succeeded | ExecutionState::Failed)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Running => "running",
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Record of one task's execution within a run.
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub task: TaskName,
    pub kind: TaskKind,
    pub state: ExecutionState,
    /// Set once the task reached a terminal state.
    pub duration: Option<Duration>,
    /// Rendered failure, for failed tasks.
    pub error: Option<String>,
}

impl Execution {
    pub(crate) fn pending(task: TaskName, kind: TaskKind) -> Self {
        Self {
            task,
            kind,
            state: ExecutionState::Pending,
            duration: None,
            error: None,
        }
    }
}

/// Result of one top-level run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    /// The task that was requested.
    pub task: TaskName,
    pub duration: Duration,
    /// Every task in the requested task's closure, keyed by name.
    pub executions: HashMap<TaskName, Execution>,
    pub outcome: Completion,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn execution(&self, task: &str) -> Option<&Execution> {
        self.executions.get(task)
    }

    pub fn state_of(&self, task: &str) -> Option<ExecutionState> {
        self.execution(task).map(|e| e.state)
    }

    /// Number of tasks that reached the given state.
    pub fn count(&self, state: ExecutionState) -> usize {
        self.executions
            .values()
            .filter(|e| e.state == state)
            .count()
    }

    pub fn into_result(self) -> Completion {
        self.outcome
    }
}
