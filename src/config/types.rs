//! Configuration type definitions.
//!
//! These structures mirror the build file (`gantry.yaml`) one to one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default interval between modification-time polls.
pub const DEFAULT_WATCH_INTERVAL_MS: u64 = 500;

/// Task run when none is named.
pub const DEFAULT_TASK: &str = "default";

/// A whole build file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildFile {
    /// Working directory, relative to the build file.
    pub working_dir: Option<String>,
    /// Task run when none is named. Falls back to `default`.
    pub default: Option<String>,
    /// Environment variables merged under every process task's own.
    pub environment: HashMap<String, String>,
    /// Task definitions.
    pub tasks: Vec<TaskConfig>,
    /// Watch rules for `gantry watch`.
    pub watch: Vec<WatchConfig>,
}

impl BuildFile {
    /// Name of the task to run when none is given.
    pub fn default_task(&self) -> &str {
        self.default.as_deref().unwrap_or(DEFAULT_TASK)
    }
}

/// Task configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task name. Required at top level; generated for inline children.
    pub id: Option<String>,
    /// Optional description shown by `gantry list`.
    pub description: Option<String>,
    /// Helper service kept alive while a command task runs.
    pub service: Option<ServiceConfig>,
    /// Task type and configuration.
    #[serde(flatten)]
    pub task_type: TaskTypeConfig,
}

/// Task type configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskTypeConfig {
    /// Run an external command to completion.
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        /// Run through the platform shell.
        #[serde(default)]
        shell: bool,
        /// Output prefix. Defaults to the command.
        display_name: Option<String>,
        working_dir: Option<String>,
        #[serde(default)]
        environment: HashMap<String, String>,
    },
    /// Start a long-lived process and leave it running.
    Start {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        shell: bool,
        display_name: Option<String>,
        working_dir: Option<String>,
        #[serde(default)]
        environment: HashMap<String, String>,
        /// Process table key. Defaults to the task id.
        key: Option<String>,
    },
    /// Stop a process started earlier in the same run.
    Stop {
        /// Process table key of the process to stop.
        target: String,
    },
    /// Create a directory and its parents.
    Mkdir { path: String },
    /// Empty a directory, keeping the directory itself.
    Clean { path: String },
    /// Run children one after another.
    Sequence {
        #[serde(default)]
        tasks: Vec<TaskRef>,
    },
    /// Run children concurrently.
    Parallel {
        #[serde(default)]
        tasks: Vec<TaskRef>,
    },
}

impl TaskTypeConfig {
    /// The `type` tag as written in the build file.
    pub fn type_name(&self) -> &'static str {
        match self {
            TaskTypeConfig::Command { .. } => "command",
            TaskTypeConfig::Start { .. } => "start",
            TaskTypeConfig::Stop { .. } => "stop",
            TaskTypeConfig::Mkdir { .. } => "mkdir",
            TaskTypeConfig::Clean { .. } => "clean",
            TaskTypeConfig::Sequence { .. } => "sequence",
            TaskTypeConfig::Parallel { .. } => "parallel",
        }
    }

    /// Child references of a composite, empty otherwise.
    pub fn children(&self) -> &[TaskRef] {
        match self {
            TaskTypeConfig::Sequence { tasks } | TaskTypeConfig::Parallel { tasks } => tasks,
            _ => &[],
        }
    }
}

/// A composite's child: a task name or an inline task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskRef {
    Name(String),
    Inline(Box<TaskConfig>),
}

/// A scoped helper service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub shell: bool,
    pub display_name: Option<String>,
    pub working_dir: Option<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// Re-run `task` whenever one of `paths` changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub task: String,
    pub paths: Vec<String>,
    pub interval_ms: Option<u64>,
}
