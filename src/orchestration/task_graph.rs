//! # Task Graph
//!
//! Readiness queries over a job's tasks. Dependencies are symbolic identifiers
//! resolved at query time against the tasks of the same job, so a graph can be
//! declared before every task is materialized. An unresolved reference makes
//! the dependent task not ready; it is never an error.
//!
//! Graph shape is validated once, when a job is decomposed: duplicate
//! identifiers and dependency cycles are rejected. Graphs that reach the store
//! by other means are still protected by the health monitor's stuck-job sweep.

use crate::error::{TaskerError, TaskerResult};
use crate::models::task::{Task, TaskSpec};
use crate::state_machine::TaskStatus;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use tracing::warn;

/// Borrowed adjacency view over the tasks of one job
#[derive(Debug)]
pub struct TaskGraph<'a> {
    by_identifier: HashMap<&'a str, &'a Task>,
    tasks: &'a [Task],
}

impl<'a> TaskGraph<'a> {
    pub fn new(tasks: &'a [Task]) -> Self {
        let by_identifier = tasks
            .iter()
            .map(|task| (task.task_identifier.as_str(), task))
            .collect();
        Self {
            by_identifier,
            tasks,
        }
    }

    pub fn get(&self, task_identifier: &str) -> Option<&'a Task> {
        self.by_identifier.get(task_identifier).copied()
    }

    /// Every dependency resolves to a `completed` or `skipped` task
    pub fn is_ready(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dependency| {
            self.get(dependency)
                .is_some_and(|dep| dep.job_id == task.job_id && dep.status.satisfies_dependencies())
        })
    }

    /// Ready `pending`/`queued` tasks, highest priority first, then creation order
    pub fn next_ready_tasks(&self) -> Vec<&'a Task> {
        let mut ready: Vec<&'a Task> = self
            .tasks
            .iter()
            .filter(|task| matches!(task.status, TaskStatus::Pending | TaskStatus::Queued))
            .filter(|task| self.is_ready(task))
            .collect();
        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        ready
    }

    /// Pending tasks that depend on `task_identifier` and are now ready
    pub fn ready_dependents_of(&self, task_identifier: &str) -> Vec<&'a Task> {
        self.next_ready_tasks()
            .into_iter()
            .filter(|task| task.dependencies.iter().any(|dep| dep == task_identifier))
            .collect()
    }

    /// Outputs of completed dependencies keyed by symbolic identifier
    pub fn dependency_outputs(&self, task: &Task) -> HashMap<String, serde_json::Value> {
        task.dependencies
            .iter()
            .filter_map(|dependency| {
                let dep = self.get(dependency)?;
                let output = dep.output_payload.clone()?;
                Some((dependency.clone(), output))
            })
            .collect()
    }
}

/// Reject duplicate identifiers and cyclic graphs before a job is stored
pub fn validate_task_specs(specs: &[TaskSpec]) -> TaskerResult<()> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::with_capacity(specs.len());

    for spec in specs {
        if spec.task_identifier.trim().is_empty() {
            return Err(TaskerError::ValidationError(
                "task identifier must not be empty".to_string(),
            ));
        }
        let index = graph.add_node(spec.task_identifier.as_str());
        if nodes.insert(spec.task_identifier.as_str(), index).is_some() {
            return Err(TaskerError::ValidationError(format!(
                "duplicate task identifier '{}'",
                spec.task_identifier
            )));
        }
    }

    for spec in specs {
        let dependent = nodes[spec.task_identifier.as_str()];
        for dependency in &spec.dependencies {
            match nodes.get(dependency.as_str()) {
                Some(&provider) => {
                    graph.add_edge(provider, dependent, ());
                }
                None => warn!(
                    task_identifier = %spec.task_identifier,
                    dependency = %dependency,
                    "Task depends on an identifier that is not part of the job; it stays blocked until one appears"
                ),
            }
        }
    }

    if is_cyclic_directed(&graph) {
        return Err(TaskerError::ValidationError(
            "task dependencies form a cycle".to_string(),
        ));
    }

    Ok(())
}
