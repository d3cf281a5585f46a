//! Task definitions, the leaf `Action` trait and the error vocabulary.
//!
//! A task is either a leaf (an [`Action`] producing a completion) or a
//! composite that names other tasks to run in sequence or in parallel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use super::context::ActionContext;
use super::types::TaskName;

/// Errors produced while resolving and running tasks.
///
/// A memoized completion is cloned to every composite that references the
/// same child within a run.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The requested or referenced task was never registered.
    #[error("unknown task '{name}'")]
    UnknownTask { name: TaskName },

    /// A task definition is malformed.
    #[error("invalid definition for task '{name}': {reason}")]
    InvalidDefinition { name: TaskName, reason: String },

    /// A process could not be started at all.
    #[error("{name}: failed to start: {source}")]
    SpawnError {
        name: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A process started but exited with a non-zero code.
    #[error("{name}: failed with exit code {code}")]
    ProcessFailed { name: String, code: i32 },

    /// A leaf action failed for a reason of its own.
    #[error("{0}")]
    ActionFailed(String),

    /// Wrapper naming the task the failure passed through.
    #[error("task '{name}' failed: {cause}")]
    TaskFailed { name: TaskName, cause: Box<TaskError> },
}

impl TaskError {
    /// Wrap `cause` with the name of the task it surfaced from.
    pub fn wrap(name: impl Into<TaskName>, cause: TaskError) -> Self {
        TaskError::TaskFailed {
            name: name.into(),
            cause: Box::new(cause),
        }
    }

    /// Build a `SpawnError` from an I/O error.
    pub fn spawn(name: impl Into<String>, source: std::io::Error) -> Self {
        TaskError::SpawnError {
            name: name.into(),
            source: Arc::new(source),
        }
    }

    /// Task names from the outermost wrapper down to the failing leaf.
    pub fn task_path(&self) -> Vec<&TaskName> {
        let mut path = Vec::new();
        let mut current = self;
        while let TaskError::TaskFailed { name, cause } = current {
            path.push(name);
            current = cause;
        }
        path
    }

    /// The innermost error, with all `TaskFailed` wrappers removed.
    pub fn root_cause(&self) -> &TaskError {
        let mut current = self;
        while let TaskError::TaskFailed { cause, .. } = current {
            current = cause;
        }
        current
    }

    /// Exit code of the failing process, if the root cause is one.
    pub fn exit_code(&self) -> Option<i32> {
        match self.root_cause() {
            TaskError::ProcessFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Composition kind of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Leaf,
    Sequence,
    Parallel,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Leaf => "leaf",
            TaskKind::Sequence => "sequence",
            TaskKind::Parallel => "parallel",
        };
        f.write_str(s)
    }
}

/// The work a leaf task performs.
///
/// # Example
///
/// ```ignore
/// use gantry::{Action, ActionContext, ProcessSpec, TaskError};
/// use async_trait::async_trait;
///
/// struct Lint;
///
/// #[async_trait]
/// impl Action for Lint {
///     async fn execute(&self, ctx: &ActionContext) -> Result<(), TaskError> {
///         let spec = ProcessSpec::new("clippy", "cargo").arg("clippy");
///         ctx.supervisor().run(&spec).await
///     }
/// }
/// ```
#[async_trait]
pub trait Action: Send + Sync {
    /// Run the action to completion.
    async fn execute(&self, ctx: &ActionContext) -> Result<(), TaskError>;

    /// Optional description for listings and logs.
    fn description(&self) -> Option<String> {
        None
    }
}

/// Action backed by an async closure.
pub struct FnAction<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Action for FnAction<F>
where
    F: Fn(ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn execute(&self, ctx: &ActionContext) -> Result<(), TaskError> {
        (self.f)(ctx.clone()).await
    }
}

/// Wrap an async closure as a leaf action.
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn Action>
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    Arc::new(FnAction { f })
}

/// What a task does when run.
#[derive(Clone)]
pub enum TaskBody {
    Leaf(Arc<dyn Action>),
    Sequence(Vec<TaskName>),
    Parallel(Vec<TaskName>),
}

/// A registered task.
#[derive(Clone)]
pub struct TaskDefinition {
    name: TaskName,
    body: TaskBody,
    description: Option<String>,
}

impl TaskDefinition {
    /// A leaf task.
    pub fn leaf(name: impl Into<TaskName>, action: Arc<dyn Action>) -> Self {
        let description = action.description();
        Self {
            name: name.into(),
            body: TaskBody::Leaf(action),
            description,
        }
    }

    /// A task running `children` one after another.
    pub fn sequence<I, S>(name: impl Into<TaskName>, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        Self {
            name: name.into(),
            body: TaskBody::Sequence(children.into_iter().map(Into::into).collect()),
            description: None,
        }
    }

    /// A task running `children` concurrently.
    pub fn parallel<I, S>(name: impl Into<TaskName>, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        Self {
            name: name.into(),
            body: TaskBody::Parallel(children.into_iter().map(Into::into).collect()),
            description: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &TaskName {
        &self.name
    }

    pub fn body(&self) -> &TaskBody {
        &self.body
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn kind(&self) -> TaskKind {
        match self.body {
            TaskBody::Leaf(_) => TaskKind::Leaf,
            TaskBody::Sequence(_) => TaskKind::Sequence,
            TaskBody::Parallel(_) => TaskKind::Parallel,
        }
    }

    /// Child names, empty for leaves.
    pub fn children(&self) -> &[TaskName] {
        match &self.body {
            TaskBody::Leaf(_) => &[],
            TaskBody::Sequence(children) | TaskBody::Parallel(children) => children,
        }
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("children", &self.children())
            .finish()
    }
}
