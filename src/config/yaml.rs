//! YAML build file parsing.

use std::collections::HashSet;
use std::path::Path;

use super::error::ConfigError;
use super::types::{BuildFile, TaskConfig, TaskRef, TaskTypeConfig};

/// YAML build file loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load a build file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<BuildFile, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let file: BuildFile =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate(&file)?;
        Ok(file)
    }

    /// Parse a build file from a YAML string.
    pub fn parse(yaml: &str) -> Result<BuildFile, ConfigError> {
        let file: BuildFile = serde_yaml::from_str(yaml)?;
        Self::validate(&file)?;
        Ok(file)
    }

    fn validate(file: &BuildFile) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for (index, task) in file.tasks.iter().enumerate() {
            let id = match task.id.as_deref() {
                Some(id) if !id.trim().is_empty() => id,
                _ => {
                    return Err(ConfigError::MissingField(format!("tasks[{}].id", index)));
                }
            };
            Self::validate_task(id, task, &mut ids)?;
        }

        for (index, rule) in file.watch.iter().enumerate() {
            if rule.paths.is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "watch[{}] for task '{}' has no paths",
                    index, rule.task
                )));
            }
            if rule.interval_ms == Some(0) {
                return Err(ConfigError::InvalidConfig(format!(
                    "watch[{}] interval_ms cannot be zero",
                    index
                )));
            }
        }
        Ok(())
    }

    fn validate_task<'a>(
        label: &str,
        task: &'a TaskConfig,
        ids: &mut HashSet<&'a str>,
    ) -> Result<(), ConfigError> {
        if let Some(id) = task.id.as_deref() {
            if !ids.insert(id) {
                return Err(ConfigError::InvalidConfig(format!("duplicate task id: {}", id)));
            }
        }

        if task.service.is_some() && !matches!(task.task_type, TaskTypeConfig::Command { .. }) {
            return Err(ConfigError::InvalidConfig(format!(
                "task '{}': service is only allowed on command tasks, not '{}'",
                label,
                task.task_type.type_name()
            )));
        }

        for (index, child) in task.task_type.children().iter().enumerate() {
            if let TaskRef::Inline(inline) = child {
                let child_label = match inline.id.as_deref() {
                    Some(id) => id.to_string(),
                    None => format!("{}.{}", label, index),
                };
                Self::validate_task(&child_label, inline, ids)?;
            }
        }
        Ok(())
    }
}
