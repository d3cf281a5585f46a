//! Registry of named tasks.
//!
//! Composites reference children by name and those names are only checked
//! when a task is resolved for execution, so tasks may be declared in any
//! order. Resolution walks the dependency closure of the requested task and
//! rejects unregistered children and reference cycles before anything runs.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::task::{Action, TaskDefinition, TaskError};
use super::types::TaskName;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Named task definitions, built once at startup.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskName, TaskDefinition>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task, replacing any previous definition with the same name.
    ///
    /// Returns the replaced definition, if any.
    pub fn register(
        &mut self,
        definition: TaskDefinition,
    ) -> Result<Option<TaskDefinition>, TaskError> {
        Self::check(&definition)?;
        let name = definition.name().clone();
        let previous = self.tasks.insert(name.clone(), definition);
        if previous.is_some() {
            warn!(task = %name, "task redefined, keeping the latest definition");
        }
        Ok(previous)
    }

    /// Register a leaf task.
    pub fn leaf(
        &mut self,
        name: impl Into<TaskName>,
        action: Arc<dyn Action>,
    ) -> Result<(), TaskError> {
        self.register(TaskDefinition::leaf(name, action)).map(drop)
    }

    /// Register a sequence of named children.
    pub fn sequence<I, S>(&mut self, name: impl Into<TaskName>, children: I) -> Result<(), TaskError>
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        self.register(TaskDefinition::sequence(name, children))
            .map(drop)
    }

    /// Register a parallel group of named children.
    pub fn parallel<I, S>(&mut self, name: impl Into<TaskName>, children: I) -> Result<(), TaskError>
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        self.register(TaskDefinition::parallel(name, children))
            .map(drop)
    }

    pub fn get(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All task names, sorted.
    pub fn names(&self) -> Vec<TaskName> {
        let mut names: Vec<TaskName> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve the dependency closure of `name`.
    ///
    /// Returns every task reachable from `name`, children before parents.
    pub fn resolve(&self, name: &TaskName) -> Result<Vec<TaskName>, TaskError> {
        if !self.tasks.contains_key(name) {
            return Err(TaskError::UnknownTask { name: name.clone() });
        }

        let mut marks: HashMap<&TaskName, Mark> = HashMap::new();
        let mut path: Vec<&TaskName> = Vec::new();
        let mut order = Vec::new();
        self.visit(name, &mut marks, &mut path, &mut order)?;
        Ok(order)
    }

    /// Resolve every registered task, reporting the first problem found.
    pub fn validate(&self) -> Result<(), TaskError> {
        for name in self.names() {
            self.resolve(&name)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        name: &'a TaskName,
        marks: &mut HashMap<&'a TaskName, Mark>,
        path: &mut Vec<&'a TaskName>,
        order: &mut Vec<TaskName>,
    ) -> Result<(), TaskError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<&str> = path[start..].iter().map(|n| n.as_str()).collect();
                cycle.push(name.as_str());
                return Err(TaskError::InvalidDefinition {
                    name: name.clone(),
                    reason: format!("dependency cycle: {}", cycle.join(" -> ")),
                });
            }
            None => {}
        }

        let Some(definition) = self.tasks.get(name) else {
            return Err(TaskError::UnknownTask { name: name.clone() });
        };

        marks.insert(name, Mark::Visiting);
        path.push(name);

        for child in definition.children() {
            if !self.tasks.contains_key(child) {
                return Err(TaskError::InvalidDefinition {
                    name: name.clone(),
                    reason: format!("child task '{}' is not registered", child),
                });
            }
            self.visit(child, marks, path, order)?;
        }

        path.pop();
        marks.insert(name, Mark::Done);
        order.push(name.clone());
        Ok(())
    }

    fn check(definition: &TaskDefinition) -> Result<(), TaskError> {
        let name = definition.name();
        if name.is_blank() {
            return Err(TaskError::InvalidDefinition {
                name: name.clone(),
                reason: "task name is empty".to_string(),
            });
        }
        for child in definition.children() {
            if child.is_blank() {
                return Err(TaskError::InvalidDefinition {
                    name: name.clone(),
                    reason: "child task name is empty".to_string(),
                });
            }
            if child == name {
                return Err(TaskError::InvalidDefinition {
                    name: name.clone(),
                    reason: "task lists itself as a child".to_string(),
                });
            }
        }
        Ok(())
    }
}
