//! gantry - a small build-task runner.
//!
//! Tasks are registered by name in a [`TaskRegistry`] as leaves (an
//! [`Action`]) or as sequences and parallel groups of other tasks. A
//! [`Scheduler`] runs a task and everything it references, once per run.
//! Leaves that launch external processes go through a [`Supervisor`], which
//! prefixes each output line with the process's display name and funnels
//! every process through one [`Multiplexer`].

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod output;
pub mod scheduler;
pub mod testing;
pub mod watch;

pub use config::{BuildFile, BuildPlan, ConfigError, WatchPlan, YamlLoader, load_build_plan};
pub use crate::core::context::{ActionContext, ProcessTable};
pub use crate::core::registry::TaskRegistry;
pub use crate::core::task::{Action, TaskBody, TaskDefinition, TaskError, TaskKind, action_fn};
pub use crate::core::types::{RunId, TaskName};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{
    CleanAction, CommandAction, CommandActionBuilder, ManagedProcess, MkdirAction, ProcessHandle,
    ProcessSpec, ProcessState, ServiceAction, SpawnOptions, StartAction, StopAction, Supervisor,
};
pub use output::{LINE_ENDING, LineFramer, MemorySink, Multiplexer, OutputFrame, StreamKind};
pub use scheduler::{Completion, Execution, ExecutionState, RunReport, Scheduler};
pub use watch::{FileWatcher, WatchStats, watch_task};
