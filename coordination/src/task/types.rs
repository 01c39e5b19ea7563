//! Core task types
//!
//! A `Task` is the unit of work every other component operates on. It is
//! created on submission, mutated only by the dispatcher, and serialized
//! verbatim into checkpoints.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::TaskStatus;

/// Unique identifier for tasks
pub type TaskId = String;

/// Identity of a generator, verifier or arbiter agent
pub type AgentId = String;

/// Task priority, ordered from least to most urgent
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A single unit of work in the task graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,
    /// Short title
    pub title: String,
    /// Detailed description handed to generators
    pub description: String,
    /// Scheduling priority
    #[serde(default)]
    pub priority: Priority,
    /// IDs of tasks that must complete before this one starts
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Lifecycle status
    #[serde(default)]
    pub status: TaskStatus,
    /// Open key-value hints (language, framework, requirements, agent)
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Submission timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// When the pipeline first left `Pending`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal status was reached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task with no dependencies
    pub fn new(
        id: impl Into<TaskId>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            priority: Priority::default(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a dependency on another task
    pub fn depends_on(mut self, task_id: impl Into<TaskId>) -> Self {
        self.dependencies.push(task_id.into());
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Target language hint, if any
    pub fn language(&self) -> Option<&str> {
        self.metadata.get("language").and_then(|v| v.as_str())
    }

    /// Explicit requirements listed under `metadata.requirements`
    pub fn requirements(&self) -> Vec<String> {
        match self.metadata.get("requirements") {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether this task has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::High < Priority::Critical);
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_builder_and_hints() {
        let task = Task::new("t1", "Auth", "Implement JWT auth")
            .with_priority(Priority::High)
            .depends_on("t0")
            .with_metadata("language", json!("rust"))
            .with_metadata("requirements", json!(["tokens expire", 3]));

        assert_eq!(task.dependencies, vec!["t0".to_string()]);
        assert_eq!(task.language(), Some("rust"));
        assert_eq!(task.requirements(), vec!["tokens expire", "3"]);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_deserialize_minimal_task() {
        let task: Task = serde_json::from_str(
            r#"{"id":"t1","title":"x","description":"y","dependencies":["t0"]}"#,
        )
        .unwrap();
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.metadata.is_empty());
    }
}
