//! Task table: tasks, dependency graph and stored results.
//!
//! Owned by the dispatcher behind one `RwLock`, so a status transition and
//! the result it depends on are always written together and readers never
//! observe one without the other.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use super::error::{DispatchError, DispatchResult};
use crate::consensus::ConsensusResult;
use crate::task::{IllegalTransition, Task, TaskGraph, TaskId, TaskStatus};

#[derive(Debug, Clone, Default)]
pub struct TaskTable {
    /// Submission order
    order: Vec<TaskId>,
    tasks: HashMap<TaskId, Task>,
    graph: TaskGraph,
    results: BTreeMap<TaskId, ConsensusResult>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a restored task list and its results
    pub fn restore(
        tasks: Vec<Task>,
        results: BTreeMap<TaskId, ConsensusResult>,
    ) -> DispatchResult<Self> {
        let graph = TaskGraph::build(&tasks)?;
        let order = tasks.iter().map(|t| t.id.clone()).collect();
        let tasks = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        Ok(Self {
            order,
            tasks,
            graph,
            results,
        })
    }

    /// Validate and add a batch; nothing is added when any task is rejected
    pub fn insert_all(&mut self, tasks: Vec<Task>) -> DispatchResult<()> {
        self.graph.extend(&tasks)?;
        for mut task in tasks {
            task.status = TaskStatus::Pending;
            task.started_at = None;
            task.finished_at = None;
            self.order.push(task.id.clone());
            self.tasks.insert(task.id.clone(), task);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, task_id: &str) -> DispatchResult<&Task> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| DispatchError::UnknownTask(task_id.to_string()))
    }

    pub fn status(&self, task_id: &str) -> DispatchResult<TaskStatus> {
        self.get(task_id).map(|t| t.status)
    }

    pub fn result(&self, task_id: &str) -> Option<&ConsensusResult> {
        self.results.get(task_id)
    }

    pub fn results(&self) -> &BTreeMap<TaskId, ConsensusResult> {
        &self.results
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// All tasks in submission order
    pub fn tasks(&self) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .cloned()
            .collect()
    }

    /// Direct dependencies that have not completed yet
    pub fn pending_dependencies(&self, task_id: &str) -> DispatchResult<Vec<TaskId>> {
        let task = self.get(task_id)?;
        Ok(task
            .dependencies
            .iter()
            .filter(|dep| {
                self.tasks
                    .get(dep.as_str())
                    .map_or(true, |d| d.status != TaskStatus::Completed)
            })
            .cloned()
            .collect())
    }

    /// Whether any transitive dependency ended in `Failed`
    pub fn has_failed_dependency(&self, task_id: &str) -> bool {
        self.graph
            .transitive_dependencies(task_id)
            .iter()
            .any(|dep| {
                self.tasks
                    .get(dep.as_str())
                    .is_some_and(|d| matches!(d.status, TaskStatus::Failed(_)))
            })
    }

    /// Atomic check-and-set of a task's status; returns the previous one
    pub fn transition(&mut self, task_id: &str, to: TaskStatus) -> DispatchResult<TaskStatus> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| DispatchError::UnknownTask(task_id.to_string()))?;
        let from = task.status;
        if !from.can_transition_to(to) {
            return Err(IllegalTransition { from, to }.into());
        }

        let now = Utc::now();
        match to {
            TaskStatus::Pending => {
                task.started_at = None;
                task.finished_at = None;
            }
            TaskStatus::Routed => task.started_at = Some(now),
            s if s.is_terminal() => task.finished_at = Some(now),
            _ => {}
        }
        task.status = to;

        // A retried task gets a fresh result
        if to == TaskStatus::Pending {
            self.results.remove(task_id);
        }
        Ok(from)
    }

    /// Send every non-terminal task back to `Pending`, dropping partial work.
    ///
    /// Only used on recovery; bypasses the transition guard.
    pub fn reset_in_flight(&mut self) -> Vec<TaskId> {
        let mut reset = Vec::new();
        for id in &self.order {
            let Some(task) = self.tasks.get_mut(id) else {
                continue;
            };
            if task.status.is_terminal() || task.status == TaskStatus::Pending {
                continue;
            }
            task.status = TaskStatus::Pending;
            task.started_at = None;
            task.finished_at = None;
            self.results.remove(id);
            reset.push(id.clone());
        }
        reset
    }

    /// Move `Voting → Learning` and store the result under the same write
    pub fn record_result(&mut self, result: ConsensusResult) -> DispatchResult<TaskStatus> {
        let from = self.transition(&result.task_id, TaskStatus::Learning)?;
        self.results.insert(result.task_id.clone(), result);
        Ok(from)
    }
}
