//! gantry - a small build-task runner.
//!
//! Usage:
//!   gantry run [TASK]            Run a task (default: the build file's default task)
//!   gantry list [--json]         List the tasks in the build file
//!   gantry validate              Check that every task resolves
//!   gantry watch [TASK PATH...]  Re-run tasks when watched files change

use clap::{Parser, Subcommand};
use gantry::{
    BuildPlan, EventBus, EventHandler, FileWatcher, Multiplexer, Scheduler, Supervisor, TaskKind,
    TaskName, load_build_plan, watch_task,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// gantry - a small build-task runner
#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the build file
    #[arg(short = 'f', long = "file", global = true, default_value = "gantry.yaml")]
    file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task and everything it references
    Run {
        /// Task to run (default: the build file's default task)
        #[arg(value_name = "TASK")]
        task: Option<String>,
    },

    /// List the tasks in the build file
    List {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that every task and watch rule resolves
    Validate,

    /// Re-run a task whenever watched files change
    Watch {
        /// Task to re-run (default: every watch rule in the build file)
        #[arg(value_name = "TASK")]
        task: Option<String>,

        /// Paths to watch, overriding the build file's rules for TASK
        #[arg(value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },
}

/// Logging event handler for task lifecycle events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &gantry::Event) {
        match event {
            gantry::Event::RunStarted { task, run_id, .. } => {
                info!("Run '{}' started (run: {})", task, run_id);
            }
            gantry::Event::RunCompleted {
                task,
                success,
                duration,
                ..
            } => {
                if *success {
                    info!("Run '{}' finished in {:?}", task, duration);
                } else {
                    error!("Run '{}' failed after {:?}", task, duration);
                }
            }
            gantry::Event::TaskStarted { task, kind, .. } => {
                if *kind == TaskKind::Leaf {
                    info!("  Task '{}' started", task);
                }
            }
            gantry::Event::TaskSucceeded { task, duration, .. } => {
                info!("  Task '{}' finished in {:?}", task, duration);
            }
            gantry::Event::TaskFailed {
                task, exit_code, ..
            } => {
                let exit_info = exit_code
                    .map(|c| format!(" (exit: {})", c))
                    .unwrap_or_default();
                warn!("  Task '{}' failed{}", task, exit_info);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Task output owns stdout.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { task } => run_task(cli.file, task).await,
        Commands::List { json } => {
            list_tasks(cli.file, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate => validate(cli.file),
        Commands::Watch {
            task,
            paths,
            interval_ms,
        } => watch(cli.file, task, paths, interval_ms).await,
    }
}

async fn build_scheduler(plan: &BuildPlan) -> Scheduler {
    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let supervisor = Supervisor::new(Multiplexer::stdio()).with_working_dir(&plan.working_dir);
    Scheduler::new(plan.registry.clone(), supervisor).with_event_bus(event_bus)
}

/// Run one task to completion.
async fn run_task(
    file: PathBuf,
    task: Option<String>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let plan = load_build_plan(&file)?;
    let task = task
        .map(TaskName::new)
        .unwrap_or_else(|| plan.default_task.clone());
    let scheduler = build_scheduler(&plan).await;

    let report = tokio::select! {
        report = scheduler.execute(task.clone()) => report,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            scheduler.supervisor().output().flush().await;
            return Ok(ExitCode::from(130));
        }
    };
    scheduler.supervisor().output().flush().await;

    match report {
        Ok(report) if report.is_success() => Ok(ExitCode::SUCCESS),
        Ok(report) => {
            if let Err(e) = &report.outcome {
                let path: Vec<&str> = e.task_path().iter().map(|n| n.as_str()).collect();
                error!("Task path: {}", path.join(" > "));
                error!("Cause: {}", e.root_cause());
            }
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            error!("{}", e);
            if matches!(e, gantry::TaskError::UnknownTask { .. }) {
                let names: Vec<String> =
                    plan.registry.names().iter().map(|n| n.to_string()).collect();
                error!("Available tasks: {}", names.join(", "));
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

#[derive(Serialize)]
struct TaskSummary<'a> {
    name: &'a str,
    kind: TaskKind,
    children: Vec<&'a str>,
    description: Option<&'a str>,
}

/// List all tasks in the build file.
fn list_tasks(file: PathBuf, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let plan = load_build_plan(&file)?;
    let names = plan.registry.names();
    let summaries: Vec<TaskSummary<'_>> = names
        .iter()
        .filter_map(|name| plan.registry.get(name.as_str()))
        .map(|def| TaskSummary {
            name: def.name().as_str(),
            kind: def.kind(),
            children: def.children().iter().map(|c| c.as_str()).collect(),
            description: def.description(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No tasks found in {}", file.display());
        return Ok(());
    }

    println!("Tasks in {} (default: {}):", file.display(), plan.default_task);
    println!();
    for task in &summaries {
        match task.kind {
            TaskKind::Leaf => println!("  {}", task.name),
            kind => println!("  {} ({}: {})", task.name, kind, task.children.join(", ")),
        }
        if let Some(description) = task.description {
            println!("      {}", description);
        }
    }
    Ok(())
}

/// Validate the build file without running anything.
fn validate(file: PathBuf) -> Result<ExitCode, Box<dyn std::error::Error>> {
    info!("Validating: {}", file.display());
    let plan = match load_build_plan(&file) {
        Ok(plan) => plan,
        Err(e) => {
            error!("Validation failed: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut problems = Vec::new();
    if let Err(e) = plan.registry.validate() {
        problems.push(e.to_string());
    }
    if !plan.registry.is_empty() && !plan.registry.contains(plan.default_task.as_str()) {
        problems.push(format!("default task '{}' is not defined", plan.default_task));
    }
    for rule in &plan.watches {
        if !plan.registry.contains(rule.task.as_str()) {
            problems.push(format!("watch rule names unknown task '{}'", rule.task));
        }
    }

    if problems.is_empty() {
        info!("All {} task(s) are valid", plan.registry.len());
        Ok(ExitCode::SUCCESS)
    } else {
        for problem in &problems {
            error!("Validation failed: {}", problem);
        }
        Ok(ExitCode::FAILURE)
    }
}

/// Watch files and re-run tasks until Ctrl+C.
async fn watch(
    file: PathBuf,
    task: Option<String>,
    paths: Vec<PathBuf>,
    interval_ms: u64,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let plan = load_build_plan(&file)?;
    let scheduler = build_scheduler(&plan).await;
    let default_interval = Duration::from_millis(interval_ms.max(1));

    let rules: Vec<(TaskName, FileWatcher)> = match task {
        Some(task) if !paths.is_empty() => {
            let paths = paths.iter().map(|p| plan.working_dir.join(p));
            vec![(TaskName::new(task), FileWatcher::new(paths, default_interval))]
        }
        Some(task) => plan
            .watches
            .iter()
            .filter(|rule| rule.task.as_str() == task)
            .map(|rule| (rule.task.clone(), FileWatcher::new(rule.paths.clone(), rule.interval)))
            .collect(),
        None => plan
            .watches
            .iter()
            .map(|rule| (rule.task.clone(), FileWatcher::new(rule.paths.clone(), rule.interval)))
            .collect(),
    };

    if rules.is_empty() {
        warn!("Nothing to watch in {}", file.display());
        return Ok(ExitCode::FAILURE);
    }

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let mut watchers = JoinSet::new();
    for (task, watcher) in rules {
        let scheduler = scheduler.clone();
        let mut stop = stop_rx.clone();
        watchers.spawn(async move {
            let shutdown = async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            };
            watch_task(&scheduler, task, watcher, shutdown).await
        });
    }

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    let _ = stop_tx.send(true);

    let mut exit = ExitCode::SUCCESS;
    while let Some(joined) = watchers.join_next().await {
        match joined {
            Ok(Ok(stats)) => info!("Watch finished: {} run(s), {} failed", stats.runs, stats.failures),
            Ok(Err(e)) => {
                error!("{}", e);
                exit = ExitCode::FAILURE;
            }
            Err(e) => {
                error!("Watcher task failed: {}", e);
                exit = ExitCode::FAILURE;
            }
        }
    }
    scheduler.supervisor().output().flush().await;
    Ok(exit)
}
