//! Process-backed leaf actions.
//!
//! [`CommandAction`] runs one external command to completion. The other
//! actions here manage processes that outlive a single step:
//!
//! - [`ServiceAction`] keeps a helper service alive for exactly the duration
//!   of a main command and always stops it afterwards.
//! - [`StartAction`] and [`StopAction`] split a long-lived process across two
//!   tasks of the same run, connected through the run's
//!   [`ProcessTable`](crate::core::context::ProcessTable).
//!
//! # Example
//!
//! ```ignore
//! use gantry::{CommandAction, ServiceAction, TaskDefinition};
//! use std::sync::Arc;
//!
//! let compile = CommandAction::builder("lein")
//!     .args(["cljsbuild", "once"])
//!     .working_dir("site")
//!     .build();
//!
//! let test = ServiceAction::new(
//!     CommandAction::builder("python3").args(["-m", "http.server"]).build().into_spec(),
//!     CommandAction::builder("npm").arg("test").build().into_spec(),
//! );
//!
//! let compile = TaskDefinition::leaf("compile", Arc::new(compile));
//! let test = TaskDefinition::leaf("test", Arc::new(test));
//! ```

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::supervisor::{ProcessSpec, ProcessState};
use crate::core::context::ActionContext;
use crate::core::task::{Action, TaskError};

/// Runs an external command and waits for it to exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAction {
    spec: ProcessSpec,
}

impl CommandAction {
    /// Create a new builder for a command action.
    pub fn builder(program: impl Into<String>) -> CommandActionBuilder {
        CommandActionBuilder::new(program)
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn into_spec(self) -> ProcessSpec {
        self.spec
    }
}

impl From<ProcessSpec> for CommandAction {
    fn from(spec: ProcessSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Action for CommandAction {
    async fn execute(&self, ctx: &ActionContext) -> Result<(), TaskError> {
        ctx.supervisor().run(&self.spec).await
    }

    fn description(&self) -> Option<String> {
        Some(self.spec.command_line())
    }
}

/// Builder for [`CommandAction`].
#[derive(Debug, Clone)]
pub struct CommandActionBuilder {
    display_name: Option<String>,
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
    shell: bool,
}

impl CommandActionBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            display_name: None,
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            shell: false,
        }
    }

    /// Prefix used for the command's output lines. Defaults to the program.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a single environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Run through the platform shell.
    pub fn shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    /// Build the process spec without wrapping it in an action.
    pub fn build_spec(self) -> ProcessSpec {
        let display_name = self.display_name.unwrap_or_else(|| self.program.clone());
        let mut spec = ProcessSpec::new(display_name, self.program)
            .args(self.args)
            .shell(self.shell);
        for (key, value) in self.env {
            spec = spec.env(key, value);
        }
        if let Some(dir) = self.working_dir {
            spec = spec.working_dir(dir);
        }
        spec
    }

    pub fn build(self) -> CommandAction {
        CommandAction {
            spec: self.build_spec(),
        }
    }
}

/// Runs `main` while `service` is alive, then always stops `service`.
///
/// The result is the main command's result. A service that cannot be
/// started fails the action before the main command runs.
#[derive(Debug, Clone)]
pub struct ServiceAction {
    service: ProcessSpec,
    main: ProcessSpec,
}

impl ServiceAction {
    pub fn new(service: ProcessSpec, main: ProcessSpec) -> Self {
        Self { service, main }
    }

    pub fn service(&self) -> &ProcessSpec {
        &self.service
    }

    pub fn main(&self) -> &ProcessSpec {
        &self.main
    }
}

#[async_trait]
impl Action for ServiceAction {
    async fn execute(&self, ctx: &ActionContext) -> Result<(), TaskError> {
        let supervisor = ctx.supervisor();
        let service = supervisor.spawn(&self.service)?;
        let handle = service.handle().clone();
        debug!(service = %handle.name(), "service started");

        let result = supervisor.run(&self.main).await;

        let final_state = handle.stop().await;
        if let ProcessState::Exited(code) = final_state {
            warn!(
                service = %handle.name(),
                code,
                "service exited before the main command finished"
            );
        }
        // The service's own completion is not part of the result.
        let _ = service.wait().await;
        result
    }

    fn description(&self) -> Option<String> {
        Some(format!(
            "{} (with {})",
            self.main.command_line(),
            self.service.command_line()
        ))
    }
}

/// Starts a long-lived process and leaves it running for the rest of the run.
///
/// The handle is stored in the run's process table under `key`, or under the
/// task's own name when no key is set. The action completes as soon as the
/// process has been spawned. A process nobody stops is terminated when the
/// run's process table is dropped.
#[derive(Debug, Clone)]
pub struct StartAction {
    spec: ProcessSpec,
    key: Option<String>,
}

impl StartAction {
    pub fn new(spec: ProcessSpec) -> Self {
        Self { spec, key: None }
    }

    /// Register the handle under `key` instead of the task name.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

#[async_trait]
impl Action for StartAction {
    async fn execute(&self, ctx: &ActionContext) -> Result<(), TaskError> {
        let (handle, completion) = ctx.supervisor().spawn(&self.spec)?.into_parts();
        let key = self
            .key
            .clone()
            .unwrap_or_else(|| ctx.task().as_str().to_string());
        debug!(key = %key, pid = ?handle.pid(), "process started");

        // The table holds the only handle, so the process ends with the run.
        if let Some(previous) = ctx.processes().insert(key.clone(), handle) {
            warn!(key = %key, "replacing running process handle");
            previous.terminate();
        }

        tokio::spawn(async move {
            match completion.await {
                Ok(Err(e)) => warn!(key = %key, error = %e, "background process failed"),
                Err(e) => warn!(key = %key, error = %e, "background process supervisor failed"),
                Ok(Ok(())) => {}
            }
        });
        Ok(())
    }

    fn description(&self) -> Option<String> {
        Some(format!("start {}", self.spec.command_line()))
    }
}

/// Stops the process registered under `target` and waits for it to end.
#[derive(Debug, Clone)]
pub struct StopAction {
    target: String,
}

impl StopAction {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl Action for StopAction {
    async fn execute(&self, ctx: &ActionContext) -> Result<(), TaskError> {
        let handle = ctx.processes().remove(&self.target).ok_or_else(|| {
            TaskError::ActionFailed(format!("no process registered under '{}'", self.target))
        })?;
        let state = handle.stop().await;
        debug!(target = %self.target, state = %state, "process stopped");
        Ok(())
    }

    fn description(&self) -> Option<String> {
        Some(format!("stop {}", self.target))
    }
}
