//! Task dependency graph
//!
//! Edges point from a dependency to its dependent, so a topological order
//! is also a valid execution order. Validation runs on every insertion and
//! rejects unknown references, duplicate ids and cycles before any task is
//! accepted.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use super::types::{Task, TaskId};

/// Rejections raised while validating a task graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("Duplicate task id: {0}")]
    DuplicateTask(TaskId),

    #[error("Dependency cycle among tasks: {}", .0.join(" → "))]
    Cycle(Vec<TaskId>),

    #[error("Task id must not be empty")]
    EmptyId,
}

/// Result type for graph validation
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Directed acyclic graph of task dependencies
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    graph: DiGraph<TaskId, ()>,
    index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a graph from a complete task list
    pub fn build<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> ValidationResult<Self> {
        let tasks: Vec<&Task> = tasks.into_iter().collect();
        let mut graph = Self::new();
        graph.extend(tasks)?;
        Ok(graph)
    }

    /// Check a complete task list without keeping the graph
    pub fn validate<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> ValidationResult<()> {
        Self::build(tasks).map(|_| ())
    }

    /// Number of tasks in the graph
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the graph has no tasks
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether a task id is known
    pub fn contains(&self, task_id: &str) -> bool {
        self.index.contains_key(task_id)
    }

    /// Add a batch of tasks atomically.
    ///
    /// Dependencies may reference tasks already in the graph or tasks in
    /// the same batch. On error the graph is left unchanged.
    pub fn extend<'a>(&mut self, tasks: impl IntoIterator<Item = &'a Task>) -> ValidationResult<()> {
        let tasks: Vec<&Task> = tasks.into_iter().collect();
        let mut next = self.clone();

        for task in &tasks {
            if task.id.trim().is_empty() {
                return Err(ValidationError::EmptyId);
            }
            if next.index.contains_key(&task.id) {
                return Err(ValidationError::DuplicateTask(task.id.clone()));
            }
            let node = next.graph.add_node(task.id.clone());
            next.index.insert(task.id.clone(), node);
        }

        for task in &tasks {
            let dependent = next.index[&task.id];
            for dep in &task.dependencies {
                let dependency =
                    *next
                        .index
                        .get(dep)
                        .ok_or_else(|| ValidationError::UnknownDependency {
                            task: task.id.clone(),
                            dependency: dep.clone(),
                        })?;
                next.graph.update_edge(dependency, dependent, ());
            }
        }

        if toposort(&next.graph, None).is_err() {
            return Err(ValidationError::Cycle(next.find_cycle()));
        }

        *self = next;
        Ok(())
    }

    /// Ids of the first strongly connected component that forms a cycle.
    fn find_cycle(&self) -> Vec<TaskId> {
        for component in kosaraju_scc(&self.graph) {
            let is_cycle = component.len() > 1
                || component
                    .first()
                    .is_some_and(|n| self.graph.contains_edge(*n, *n));
            if is_cycle {
                let mut ids: Vec<TaskId> =
                    component.iter().map(|n| self.graph[*n].clone()).collect();
                ids.sort();
                return ids;
            }
        }
        Vec::new()
    }

    /// All task ids in dependency order (dependencies first).
    ///
    /// Ties are broken by insertion order so the result is deterministic.
    pub fn topological_order(&self) -> Vec<TaskId> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Incoming).count()))
            .collect();

        let mut ready: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(node) = ready.pop_front() {
            order.push(self.graph[node].clone());
            let mut released: Vec<NodeIndex> = Vec::new();
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        released.push(next);
                    }
                }
            }
            released.sort();
            ready.extend(released);
        }

        order
    }

    /// Every task `task_id` depends on, directly or transitively
    pub fn transitive_dependencies(&self, task_id: &str) -> Vec<TaskId> {
        let Some(start) = self.index.get(task_id) else {
            return Vec::new();
        };
        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::from([*start]);
        while let Some(node) = queue.pop_front() {
            for prev in self.graph.neighbors_directed(node, Direction::Incoming) {
                if seen.insert(prev) {
                    queue.push_back(prev);
                }
            }
        }
        let mut ids: Vec<TaskId> = seen.into_iter().map(|n| self.graph[n].clone()).collect();
        ids.sort();
        ids
    }
}
