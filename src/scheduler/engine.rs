//! Task graph scheduler.
//!
//! [`Scheduler::run`] resolves the requested task's closure, then walks it:
//! leaves run their action, sequences run children one after another and
//! stop at the first failure, parallel groups run every child concurrently
//! and wait for all of them. Each task executes at most once per run; a
//! task reached through several composites shares a single completion.
//!
//! Failures are wrapped in [`TaskError::TaskFailed`] at the failing task and
//! again at each composite they pass through, so the final error carries the
//! full path from the requested task down to the root cause.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

use super::types::{Completion, Execution, ExecutionState, RunReport};
use crate::core::context::{ActionContext, ProcessTable};
use crate::core::registry::TaskRegistry;
use crate::core::task::{Action, TaskBody, TaskError};
use crate::core::types::{RunId, TaskName};
use crate::events::{Event, EventBus};
use crate::execution::Supervisor;

type BoxedCompletion = Pin<Box<dyn Future<Output = Completion> + Send>>;

/// Runs tasks from an immutable registry.
///
/// Cloning is cheap; clones share the registry, supervisor and event bus.
#[derive(Clone)]
pub struct Scheduler {
    registry: Arc<TaskRegistry>,
    supervisor: Supervisor,
    event_bus: Option<Arc<EventBus>>,
}

impl Scheduler {
    /// Take ownership of `registry`. It cannot change afterwards.
    pub fn new(registry: TaskRegistry, supervisor: Supervisor) -> Self {
        Self {
            registry: Arc::new(registry),
            supervisor,
            event_bus: None,
        }
    }

    /// Emit lifecycle events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Run `name` and return its completion.
    pub async fn run(&self, name: impl Into<TaskName>) -> Completion {
        self.execute(name).await?.into_result()
    }

    /// Run `name` and return the full report.
    ///
    /// Resolution problems (unknown task, missing child, cycle) are returned
    /// as `Err` before anything starts and without emitting events. Task
    /// failures are reported through [`RunReport::outcome`].
    pub async fn execute(&self, name: impl Into<TaskName>) -> Result<RunReport, TaskError> {
        let name = name.into();
        let closure = self.registry.resolve(&name)?;

        let run_id = RunId::new();
        let state = Arc::new(RunState::new(
            run_id,
            Arc::clone(&self.registry),
            self.supervisor.clone(),
            self.event_bus.clone(),
            &closure,
        ));

        let span = info_span!("run", run_id = %run_id, task = %name);
        async move {
            info!(tasks = closure.len(), "run started");
            state.emit(Event::run_started(run_id, name.clone())).await;

            let start = Instant::now();
            let outcome = Arc::clone(&state).run_task(name.clone()).await;
            let duration = start.elapsed();

            match &outcome {
                Ok(()) => info!(duration_ms = duration.as_millis() as u64, "run succeeded"),
                Err(e) => warn!(
                    duration_ms = duration.as_millis() as u64,
                    error = %e.root_cause(),
                    "run failed"
                ),
            }
            state
                .emit(Event::run_completed(
                    run_id,
                    name.clone(),
                    outcome.is_ok(),
                    duration,
                ))
                .await;

            Ok(RunReport {
                run_id,
                task: name,
                duration,
                executions: state.take_executions(),
                outcome,
            })
        }
        .instrument(span)
        .await
    }
}

/// State shared by every task of one run.
struct RunState {
    run_id: RunId,
    registry: Arc<TaskRegistry>,
    supervisor: Supervisor,
    processes: ProcessTable,
    event_bus: Option<Arc<EventBus>>,
    cells: HashMap<TaskName, Arc<OnceCell<Completion>>>,
    executions: Mutex<HashMap<TaskName, Execution>>,
}

impl RunState {
    fn new(
        run_id: RunId,
        registry: Arc<TaskRegistry>,
        supervisor: Supervisor,
        event_bus: Option<Arc<EventBus>>,
        closure: &[TaskName],
    ) -> Self {
        let cells = closure
            .iter()
            .map(|name| (name.clone(), Arc::new(OnceCell::new())))
            .collect();
        let executions = closure
            .iter()
            .filter_map(|name| registry.get(name.as_str()))
            .map(|def| (def.name().clone(), Execution::pending(def.name().clone(), def.kind())))
            .collect();

        Self {
            run_id,
            registry,
            supervisor,
            processes: ProcessTable::new(),
            event_bus,
            cells,
            executions: Mutex::new(executions),
        }
    }

    /// Completion of `name`, executing it on first request.
    fn run_task(self: Arc<Self>, name: TaskName) -> BoxedCompletion {
        Box::pin(async move {
            let Some(cell) = self.cells.get(&name).cloned() else {
                return Err(TaskError::UnknownTask { name });
            };
            let state = Arc::clone(&self);
            cell.get_or_init(|| state.execute_task(name))
                .await
                .clone()
        })
    }

    async fn execute_task(self: Arc<Self>, name: TaskName) -> Completion {
        let Some(definition) = self.registry.get(name.as_str()).cloned() else {
            return Err(TaskError::UnknownTask { name });
        };
        let kind = definition.kind();

        let span = info_span!("task", task = %name, kind = %kind);
        async move {
            debug!("task started");
            self.set_state(&name, ExecutionState::Running, None, None);
            self.emit(Event::task_started(self.run_id, name.clone(), kind))
                .await;

            let start = Instant::now();
            let result = match definition.body() {
                TaskBody::Leaf(action) => self.run_leaf(&name, Arc::clone(action)).await,
                TaskBody::Sequence(children) => self.run_sequence(children).await,
                TaskBody::Parallel(children) => self.run_parallel(children).await,
            }
            .map_err(|cause| TaskError::wrap(name.clone(), cause));
            let duration = start.elapsed();

            self.finish(&name, &result, duration).await;
            result
        }
        .instrument(span)
        .await
    }

    async fn run_leaf(&self, name: &TaskName, action: Arc<dyn Action>) -> Completion {
        let ctx = ActionContext::new(
            name.clone(),
            self.run_id,
            self.supervisor.clone(),
            self.processes.clone(),
        );
        let handle = tokio::spawn(async move { action.execute(&ctx).await }.in_current_span());
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(TaskError::ActionFailed(format!(
                "action panicked: {}",
                panic_message(e.into_panic())
            ))),
            Err(e) => Err(TaskError::ActionFailed(format!("action aborted: {}", e))),
        }
    }

    async fn run_sequence(self: &Arc<Self>, children: &[TaskName]) -> Completion {
        for child in children {
            Arc::clone(self).run_task(child.clone()).await?;
        }
        Ok(())
    }

    async fn run_parallel(self: &Arc<Self>, children: &[TaskName]) -> Completion {
        let mut set = JoinSet::new();
        for child in children {
            set.spawn(Arc::clone(self).run_task(child.clone()).in_current_span());
        }

        let mut first_failure = None;
        while let Some(joined) = set.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(TaskError::ActionFailed(format!("parallel branch aborted: {}", e)))
            });
            if let Err(e) = result {
                first_failure.get_or_insert(e);
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn finish(&self, name: &TaskName, result: &Completion, duration: Duration) {
        match result {
            Ok(()) => {
                debug!(duration_ms = duration.as_millis() as u64, "task succeeded");
                self.set_state(name, ExecutionState::Succeeded, Some(duration), None);
                self.emit(Event::task_succeeded(self.run_id, name.clone(), duration))
                    .await;
            }
            Err(e) => {
                let rendered = e.to_string();
                debug!(error = %rendered, "task failed");
                self.set_state(
                    name,
                    ExecutionState::Failed,
                    Some(duration),
                    Some(rendered.clone()),
                );
                self.emit(Event::task_failed(
                    self.run_id,
                    name.clone(),
                    rendered,
                    e.exit_code(),
                    duration,
                ))
                .await;
            }
        }
    }

    fn set_state(
        &self,
        name: &TaskName,
        state: ExecutionState,
        duration: Option<Duration>,
        error: Option<String>,
    ) {
        let mut executions = self
            .executions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(execution) = executions.get_mut(name) {
            execution.state = state;
            execution.duration = duration;
            execution.error = error;
        }
    }

    fn take_executions(&self) -> HashMap<TaskName, Execution> {
        let mut executions = self
            .executions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *executions)
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).await;
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
