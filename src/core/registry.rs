//! Task registry: a tree of scheduled tasks grouped by category.
//!
//! The tree is assembled once with [`RegistryBuilder`] and is read-only
//! afterwards. It is used for bulk lifecycle operations and for looking up
//! sibling tasks to trigger.

use crate::core::task::{ScheduledTask, TaskError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Errors raised while assembling a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry entry name must not be empty")]
    EmptyName,
    #[error("registry already contains an entry named {0:?}")]
    DuplicateName(String),
}

/// A registry entry.
#[derive(Debug)]
pub enum RegistryNode {
    Leaf(Arc<ScheduledTask>),
    Group(Registry),
}

/// A read-only tree of scheduled tasks.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<(String, RegistryNode)>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up a direct child by name.
    pub fn get(&self, name: &str) -> Option<&RegistryNode> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, node)| node)
    }

    /// Look up a task by `/`-separated path, e.g. `"probes/mouse"`.
    pub fn task(&self, path: &str) -> Option<&Arc<ScheduledTask>> {
        let (head, rest) = match path.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        match (self.get(head)?, rest) {
            (RegistryNode::Leaf(task), None) => Some(task),
            (RegistryNode::Group(group), Some(rest)) => group.task(rest),
            _ => None,
        }
    }

    /// Look up a nested group by name.
    pub fn group(&self, name: &str) -> Option<&Registry> {
        match self.get(name)? {
            RegistryNode::Group(group) => Some(group),
            RegistryNode::Leaf(_) => None,
        }
    }

    /// Apply `visitor` to every task, descending into groups in insertion
    /// order.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Arc<ScheduledTask>),
    {
        self.visit(&mut visitor);
    }

    fn visit<F>(&self, visitor: &mut F)
    where
        F: FnMut(&Arc<ScheduledTask>),
    {
        for (_, node) in &self.entries {
            match node {
                RegistryNode::Leaf(task) => visitor(task),
                RegistryNode::Group(group) => group.visit(visitor),
            }
        }
    }

    /// All tasks, flattened.
    pub fn tasks(&self) -> Vec<Arc<ScheduledTask>> {
        let mut tasks = Vec::new();
        self.for_each(|task| tasks.push(Arc::clone(task)));
        tasks
    }

    /// All tasks of the given category.
    pub fn tasks_of_type(&self, task_type: &str) -> Vec<Arc<ScheduledTask>> {
        let mut tasks = Vec::new();
        self.for_each(|task| {
            if task.task_type() == task_type {
                tasks.push(Arc::clone(task));
            }
        });
        tasks
    }

    /// All tasks that buffer records for the aggregator.
    pub fn producers(&self) -> Vec<Arc<ScheduledTask>> {
        let mut tasks = Vec::new();
        self.for_each(|task| {
            if task.producer().is_some() {
                tasks.push(Arc::clone(task));
            }
        });
        tasks
    }

    /// Trigger every task of the given category; returns how many matched.
    pub fn trigger_type(&self, task_type: &str) -> usize {
        let mut count = 0;
        self.for_each(|task| {
            if task.task_type() == task_type {
                task.trigger();
                count += 1;
            }
        });
        count
    }

    pub fn trigger_all(&self) {
        self.for_each(|task| task.trigger());
    }

    /// Start every task. Stops at the first task that fails to start.
    pub fn start_all(self: &Arc<Self>) -> Result<(), TaskError> {
        let mut result = Ok(());
        self.for_each(|task| {
            if result.is_ok() {
                result = task.start(Arc::clone(self));
            }
        });
        result
    }

    /// Join every task, waiting up to `timeout` for each.
    ///
    /// Returns the identifiers of tasks still running after their timeout.
    pub fn join_all(&self, timeout: Duration) -> Vec<String> {
        let mut timed_out = Vec::new();
        self.for_each(|task| {
            if !task.join(timeout) {
                warn!(task = task.identifier(), "task did not stop in time");
                timed_out.push(task.identifier().to_string());
            }
        });
        timed_out
    }

    /// Number of tasks in the tree.
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.for_each(|_| count += 1);
        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds a [`Registry`]; the only way to add entries.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: Vec<(String, RegistryNode)>,
}

impl RegistryBuilder {
    /// Add a task leaf.
    pub fn task(
        self,
        name: impl Into<String>,
        task: Arc<ScheduledTask>,
    ) -> Result<Self, RegistryError> {
        self.insert(name.into(), RegistryNode::Leaf(task))
    }

    /// Add a nested group.
    pub fn group(self, name: impl Into<String>, group: Registry) -> Result<Self, RegistryError> {
        self.insert(name.into(), RegistryNode::Group(group))
    }

    fn insert(mut self, name: String, node: RegistryNode) -> Result<Self, RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.entries.iter().any(|(entry, _)| *entry == name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.entries.push((name, node));
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::{Task, TaskContext, TaskEnv};

    struct Named(&'static str);

    impl Task for Named {
        fn task_type(&self) -> &str {
            self.0
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn perform_work(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn scheduled(task_type: &'static str) -> Arc<ScheduledTask> {
        Arc::new(ScheduledTask::new(task_type, Arc::new(Named(task_type)), TaskEnv::default()).unwrap())
    }

    fn sample_registry() -> Registry {
        let probes = Registry::builder()
            .task("mouse", scheduled("mouse"))
            .unwrap()
            .task("window", scheduled("window"))
            .unwrap()
            .build();

        Registry::builder()
            .group("probes", probes)
            .unwrap()
            .task("logger", scheduled("logger"))
            .unwrap()
            .build()
    }

    #[test]
    fn test_for_each_visits_nested_leaves_in_order() {
        let registry = sample_registry();
        let mut seen = Vec::new();
        registry.for_each(|task| seen.push(task.identifier().to_string()));
        assert_eq!(seen, ["mouse", "window", "logger"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_path_lookup() {
        let registry = sample_registry();
        assert_eq!(registry.task("probes/window").unwrap().task_type(), "window");
        assert_eq!(registry.task("logger").unwrap().task_type(), "logger");
        assert!(registry.task("probes").is_none());
        assert!(registry.task("logger/extra").is_none());
        assert!(registry.group("probes").is_some());
        assert!(registry.group("logger").is_none());
    }

    #[test]
    fn test_lookup_by_type() {
        let registry = sample_registry();
        assert_eq!(registry.tasks_of_type("window").len(), 1);
        assert!(registry.tasks_of_type("clipboard").is_empty());
        assert_eq!(registry.trigger_type("mouse"), 1);
        assert!(registry.producers().is_empty());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = Registry::builder()
            .task("mouse", scheduled("mouse"))
            .unwrap()
            .task("mouse", scheduled("mouse"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "mouse"));

        let err = Registry::builder().group("", Registry::default()).unwrap_err();
        assert!(matches!(err, RegistryError::EmptyName));
    }

    #[test]
    fn test_join_all_on_unstarted_tasks() {
        let registry = sample_registry();
        assert!(registry.join_all(Duration::ZERO).is_empty());
    }
}
