//! Process supervision.
//!
//! [`Supervisor::spawn`] launches one external process, pipes its stdout and
//! stderr into the [`Multiplexer`], and hands back a [`ManagedProcess`]: a
//! terminable [`ProcessHandle`] plus a completion that resolves when the
//! process exits or is stopped by its owner.
//!
//! Completion mapping:
//!
//! - exit code 0 → `Ok(())`
//! - any other exit → [`TaskError::ProcessFailed`] (a signal death reports -1)
//! - stopped through [`ProcessHandle::terminate`] → `Ok(())`, state
//!   [`ProcessState::Terminated`]
//! - could not be started → [`TaskError::SpawnError`], returned by `spawn`
//!   itself since no process ever existed

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

use crate::core::task::TaskError;
use crate::output::{Multiplexer, StreamKind};

/// How long output draining may continue after the owner stopped a process.
///
/// A terminated shell can leave grandchildren holding its pipes open.
const TERMINATE_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// How long a process may take to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Options controlling how a process is launched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Working directory; falls back to the supervisor's default.
    pub working_dir: Option<PathBuf>,
    /// Run the command line through the platform shell.
    pub shell: bool,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

/// Everything needed to launch one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    display_name: String,
    program: String,
    args: Vec<String>,
    options: SpawnOptions,
}

impl ProcessSpec {
    /// A process shown as `display_name` in the output.
    pub fn new(display_name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            program: program.into(),
            args: Vec::new(),
            options: SpawnOptions::default(),
        }
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

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.working_dir = Some(dir.into());
        self
    }

    /// Run through the platform shell (`sh -c` / `cmd /C`).
    pub fn shell(mut self, shell: bool) -> Self {
        self.options.shell = shell;
        self
    }

    /// Add a single environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.env.push((key.into(), value.into()));
        self
    }

    /// Replace all spawn options.
    pub fn options(mut self, options: SpawnOptions) -> Self {
        self.options = options;
        self
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn spawn_options(&self) -> &SpawnOptions {
        &self.options
    }

    /// The command line as a shell would see it.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = if self.options.shell {
            shell_command(&self.command_line())
        } else {
            let mut cmd = Command::new(&self.program);
            cmd.args(&self.args);
            cmd
        };
        for (key, value) in &self.options.env {
            cmd.env(key, value);
        }
        cmd
    }
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}

#[cfg(not(windows))]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

/// Lifecycle state of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exited on its own with this code (-1 when killed by a signal).
    Exited(i32),
    /// Stopped by its owner.
    Terminated,
}

impl ProcessState {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Running => f.write_str("running"),
            ProcessState::Exited(code) => write!(f, "exited with code {}", code),
            ProcessState::Terminated => f.write_str("terminated"),
        }
    }
}

/// Cloneable control handle for a managed process.
#[derive(Clone)]
pub struct ProcessHandle {
    name: Arc<str>,
    pid: Option<u32>,
    state: watch::Receiver<ProcessState>,
    stop: Arc<Notify>,
}

impl ProcessHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id, if the platform reported one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Ask the supervisor to kill the process. No-op once it has exited.
    pub fn terminate(&self) {
        if self.is_running() {
            debug!(process = %self.name, "termination requested");
            self.stop.notify_one();
        }
    }

    /// Wait until the process is no longer running and return its final state.
    pub async fn wait(&self) -> ProcessState {
        let mut state = self.state.clone();
        let waited = state.wait_for(|s| !s.is_running()).await.map(|s| *s);
        waited.unwrap_or_else(|_| *state.borrow())
    }

    /// Terminate and wait for the final state.
    pub async fn stop(&self) -> ProcessState {
        self.terminate();
        self.wait().await
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}

/// A spawned process: its handle plus its completion.
///
/// The process is killed once every [`ProcessHandle`] for it, including the
/// one held here, has been dropped.
pub struct ManagedProcess {
    handle: ProcessHandle,
    completion: JoinHandle<Result<(), TaskError>>,
}

impl ManagedProcess {
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Wait for the process to finish and map its exit status.
    pub async fn wait(self) -> Result<(), TaskError> {
        let (handle, completion) = self.into_parts();
        let result = completion.await.unwrap_or_else(|e| {
            Err(TaskError::ActionFailed(format!(
                "{}: supervisor task failed: {}",
                handle.name, e
            )))
        });
        drop(handle);
        result
    }

    /// Split into the handle and the raw completion.
    ///
    /// Awaiting the completion does not keep the process alive; only
    /// handles do.
    pub fn into_parts(self) -> (ProcessHandle, JoinHandle<Result<(), TaskError>>) {
        (self.handle, self.completion)
    }
}

/// Launches and supervises external processes.
#[derive(Clone)]
pub struct Supervisor {
    output: Multiplexer,
    working_dir: Option<PathBuf>,
}

impl Supervisor {
    pub fn new(output: Multiplexer) -> Self {
        Self {
            output,
            working_dir: None,
        }
    }

    /// Default working directory for specs that name none.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn output(&self) -> &Multiplexer {
        &self.output
    }

    /// Launch `spec`. Output draining starts immediately.
    pub fn spawn(&self, spec: &ProcessSpec) -> Result<ManagedProcess, TaskError> {
        let name: Arc<str> = Arc::from(spec.display_name());

        if spec.program().trim().is_empty() {
            return Err(TaskError::spawn(
                spec.display_name(),
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "command is empty"),
            ));
        }

        let mut cmd = spec.command();
        if let Some(dir) = self.resolve_dir(spec.spawn_options().working_dir.as_deref()) {
            if !dir.is_dir() {
                return Err(TaskError::spawn(
                    spec.display_name(),
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("working directory '{}' does not exist", dir.display()),
                    ),
                ));
            }
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(process = %name, command = %spec.command_line(), "spawning");
        let mut child = cmd
            .spawn()
            .map_err(|e| TaskError::spawn(spec.display_name(), e))?;
        let pid = child.id();

        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(self.output.drain(name.clone(), StreamKind::Stdout, stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(self.output.drain(name.clone(), StreamKind::Stderr, stderr));
        }

        let (state_tx, state_rx) = watch::channel(ProcessState::Running);
        let stop = Arc::new(Notify::new());
        let span = info_span!("process", name = %name, pid = ?pid);
        let completion = tokio::spawn(
            supervise(name.clone(), child, drains, state_tx, stop.clone()).instrument(span),
        );

        Ok(ManagedProcess {
            handle: ProcessHandle {
                name,
                pid,
                state: state_rx,
                stop,
            },
            completion,
        })
    }

    /// Spawn `spec` and wait for it to finish.
    pub async fn run(&self, spec: &ProcessSpec) -> Result<(), TaskError> {
        self.spawn(spec)?.wait().await
    }

    fn resolve_dir(&self, dir: Option<&Path>) -> Option<PathBuf> {
        match (dir, self.working_dir.as_deref()) {
            (Some(dir), Some(root)) if dir.is_relative() => Some(root.join(dir)),
            (Some(dir), _) => Some(dir.to_path_buf()),
            (None, root) => root.map(Path::to_path_buf),
        }
    }
}

async fn supervise(
    name: Arc<str>,
    mut child: Child,
    drains: Vec<JoinHandle<()>>,
    state: watch::Sender<ProcessState>,
    stop: Arc<Notify>,
) -> Result<(), TaskError> {
    let outcome = tokio::select! {
        biased;
        status = child.wait() => match status {
            Ok(status) => ProcessState::Exited(status.code().unwrap_or(-1)),
            Err(e) => {
                state.send_replace(ProcessState::Exited(-1));
                return Err(TaskError::ActionFailed(format!(
                    "{}: waiting for process failed: {}",
                    name, e
                )));
            }
        },
        _ = stop.notified() => {
            kill_graceful(&mut child).await;
            ProcessState::Terminated
        }
        _ = state.closed() => {
            debug!("every handle dropped, stopping orphaned process");
            kill_graceful(&mut child).await;
            ProcessState::Terminated
        }
    };

    for drain in drains {
        if outcome == ProcessState::Terminated {
            let _ = tokio::time::timeout(TERMINATE_DRAIN_GRACE, drain).await;
        } else {
            let _ = drain.await;
        }
    }

    debug!(state = %outcome, "process finished");
    state.send_replace(outcome);

    match outcome {
        ProcessState::Exited(0) | ProcessState::Terminated | ProcessState::Running => Ok(()),
        ProcessState::Exited(code) => Err(TaskError::ProcessFailed {
            name: name.to_string(),
            code,
        }),
    }
}

/// Ask the process to exit, then kill it if it is still running after
/// [`TERMINATE_GRACE`].
async fn kill_graceful(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: kill(2) has no memory-safety preconditions.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        if let Ok(Ok(_)) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
            return;
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "killing process failed");
    }
}
