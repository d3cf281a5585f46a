//! Registry builder from a build file.
//!
//! Turns a parsed [`BuildFile`] into a [`TaskRegistry`] plus the settings the
//! CLI needs: the working directory, the default task and watch rules.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::core::registry::TaskRegistry;
use crate::core::task::{Action, TaskDefinition};
use crate::core::types::TaskName;
use crate::execution::{
    CleanAction, CommandAction, MkdirAction, ProcessSpec, ServiceAction, SpawnOptions, StartAction,
    StopAction,
};

use super::error::ConfigError;
use super::types::{
    BuildFile, DEFAULT_WATCH_INTERVAL_MS, ServiceConfig, TaskConfig, TaskRef, TaskTypeConfig,
};
use super::yaml::YamlLoader;

/// A watch rule with its paths resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPlan {
    pub task: TaskName,
    pub paths: Vec<PathBuf>,
    pub interval: Duration,
}

/// Everything needed to run tasks from a build file.
#[derive(Clone)]
pub struct BuildPlan {
    pub registry: TaskRegistry,
    /// Directory processes run in and relative paths resolve against.
    pub working_dir: PathBuf,
    pub default_task: TaskName,
    pub watches: Vec<WatchPlan>,
}

/// Load `path` and build it, resolving paths against the file's directory.
pub fn load_build_plan(path: impl AsRef<Path>) -> Result<BuildPlan, ConfigError> {
    let path = path.as_ref();
    let file = YamlLoader::load(path)?;
    let base_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    BuildFileBuilder::build(&file, &base_dir)
}

/// Builder for creating a [`BuildPlan`] from a [`BuildFile`].
pub struct BuildFileBuilder;

impl BuildFileBuilder {
    /// Build `file`, treating `base_dir` as the directory it was loaded from.
    pub fn build(file: &BuildFile, base_dir: &Path) -> Result<BuildPlan, ConfigError> {
        let working_dir = match file.working_dir.as_deref() {
            Some(dir) => base_dir.join(dir),
            None => base_dir.to_path_buf(),
        };

        let mut ctx = BuildContext {
            environment: &file.environment,
            registry: TaskRegistry::new(),
            seen: HashSet::new(),
        };
        for (index, task) in file.tasks.iter().enumerate() {
            let id = task
                .id
                .clone()
                .ok_or_else(|| ConfigError::MissingField(format!("tasks[{}].id", index)))?;
            ctx.add_task(TaskName::new(id), task)?;
        }

        let watches = file
            .watch
            .iter()
            .map(|rule| WatchPlan {
                task: TaskName::new(rule.task.as_str()),
                paths: rule.paths.iter().map(|p| working_dir.join(p)).collect(),
                interval: Duration::from_millis(
                    rule.interval_ms.unwrap_or(DEFAULT_WATCH_INTERVAL_MS),
                ),
            })
            .collect();

        debug!(
            tasks = ctx.registry.len(),
            working_dir = %working_dir.display(),
            "build file loaded"
        );

        Ok(BuildPlan {
            registry: ctx.registry,
            working_dir,
            default_task: TaskName::new(file.default_task()),
            watches,
        })
    }
}

struct BuildContext<'a> {
    environment: &'a HashMap<String, String>,
    registry: TaskRegistry,
    seen: HashSet<TaskName>,
}

impl BuildContext<'_> {
    fn add_task(&mut self, name: TaskName, config: &TaskConfig) -> Result<(), ConfigError> {
        if !self.seen.insert(name.clone()) {
            return Err(ConfigError::InvalidConfig(format!(
                "duplicate task id: {}",
                name
            )));
        }

        let definition = match &config.task_type {
            TaskTypeConfig::Command {
                command,
                args,
                shell,
                display_name,
                working_dir,
                environment,
            } => {
                let main = self.process_spec(
                    command,
                    args,
                    *shell,
                    display_name.as_deref(),
                    working_dir.as_deref(),
                    environment,
                );
                let action: Arc<dyn Action> = match &config.service {
                    Some(service) => Arc::new(ServiceAction::new(self.service_spec(service), main)),
                    None => Arc::new(CommandAction::from(main)),
                };
                TaskDefinition::leaf(name.clone(), action)
            }
            TaskTypeConfig::Start {
                command,
                args,
                shell,
                display_name,
                working_dir,
                environment,
                key,
            } => {
                let spec = self.process_spec(
                    command,
                    args,
                    *shell,
                    display_name.as_deref(),
                    working_dir.as_deref(),
                    environment,
                );
                let mut action = StartAction::new(spec);
                if let Some(key) = key {
                    action = action.with_key(key);
                }
                TaskDefinition::leaf(name.clone(), Arc::new(action))
            }
            TaskTypeConfig::Stop { target } => {
                TaskDefinition::leaf(name.clone(), Arc::new(StopAction::new(target)))
            }
            TaskTypeConfig::Mkdir { path } => {
                TaskDefinition::leaf(name.clone(), Arc::new(MkdirAction::new(path)))
            }
            TaskTypeConfig::Clean { path } => {
                TaskDefinition::leaf(name.clone(), Arc::new(CleanAction::new(path)))
            }
            TaskTypeConfig::Sequence { tasks } => {
                TaskDefinition::sequence(name.clone(), self.add_children(&name, tasks)?)
            }
            TaskTypeConfig::Parallel { tasks } => {
                TaskDefinition::parallel(name.clone(), self.add_children(&name, tasks)?)
            }
        };

        let definition = match &config.description {
            Some(description) => definition.with_description(description),
            None => definition,
        };
        self.registry.register(definition)?;
        Ok(())
    }

    fn add_children(
        &mut self,
        parent: &TaskName,
        children: &[TaskRef],
    ) -> Result<Vec<TaskName>, ConfigError> {
        let mut names = Vec::with_capacity(children.len());
        for (index, child) in children.iter().enumerate() {
            let name = match child {
                TaskRef::Name(name) => TaskName::new(name.as_str()),
                TaskRef::Inline(inline) => {
                    let name = match inline.id.as_deref() {
                        Some(id) => TaskName::new(id),
                        None => TaskName::new(format!("{}.{}", parent, index)),
                    };
                    self.add_task(name.clone(), inline)?;
                    name
                }
            };
            names.push(name);
        }
        Ok(names)
    }

    fn process_spec(
        &self,
        command: &str,
        args: &[String],
        shell: bool,
        display_name: Option<&str>,
        working_dir: Option<&str>,
        environment: &HashMap<String, String>,
    ) -> ProcessSpec {
        let mut merged: BTreeMap<&str, &str> = self
            .environment
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        merged.extend(environment.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let options = SpawnOptions {
            working_dir: working_dir.map(PathBuf::from),
            shell,
            env: merged
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        ProcessSpec::new(display_name.unwrap_or(command), command)
            .args(args.iter().cloned())
            .options(options)
    }

    fn service_spec(&self, service: &ServiceConfig) -> ProcessSpec {
        self.process_spec(
            &service.command,
            &service.args,
            service.shell,
            service.display_name.as_deref(),
            service.working_dir.as_deref(),
            &service.environment,
        )
    }
}
