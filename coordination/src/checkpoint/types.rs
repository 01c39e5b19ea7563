//! Checkpoint records and integrity validation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consensus::ConsensusResult;
use crate::dispatcher::MetricsSnapshot;
use crate::task::{Task, TaskId, TaskStatus};

/// Monotonic checkpoint identifier
pub type CheckpointId = u64;

/// Global orchestration state carried alongside the task list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    /// Consensus results of every task that got one
    pub results: BTreeMap<TaskId, ConsensusResult>,
    pub metrics: MetricsSnapshot,
    /// Free-form state owned by embedders
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A full, self-contained snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub id: CheckpointId,
    pub timestamp: DateTime<Utc>,
    pub tasks: Vec<Task>,
    pub state: GlobalState,
}

impl Checkpoint {
    /// Current schema version.
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(id: CheckpointId, tasks: Vec<Task>, state: GlobalState) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            id,
            timestamp: Utc::now(),
            tasks,
            state,
        }
    }
}

/// Listing entry for a stored checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub id: CheckpointId,
    /// `None` when the file could not be parsed
    pub timestamp: Option<DateTime<Utc>>,
    pub task_count: Option<usize>,
    pub bytes: u64,
    /// Whether `latest` points here
    pub latest: bool,
}

/// Integrity check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    Valid,
    /// Minor issues; safe to resume.
    Recoverable { warnings: Vec<String> },
    /// Cannot be used.
    Corrupted { errors: Vec<String> },
}

impl IntegrityStatus {
    /// Whether resume is safe.
    pub fn can_resume(&self) -> bool {
        matches!(self, Self::Valid | Self::Recoverable { .. })
    }
}

/// Validate a checkpoint before it is restored.
///
/// A completed task without a stored result, a result naming an unknown
/// task, or a duplicated task id make the checkpoint unusable.
pub fn validate_checkpoint(checkpoint: &Checkpoint) -> IntegrityStatus {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    if checkpoint.version > Checkpoint::CURRENT_VERSION {
        errors.push(format!(
            "version {} > current {}",
            checkpoint.version,
            Checkpoint::CURRENT_VERSION
        ));
    }

    let mut seen = std::collections::BTreeSet::new();
    for task in &checkpoint.tasks {
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate task id {}", task.id));
        }
        let result = checkpoint.state.results.get(&task.id);
        match (task.status, result) {
            (TaskStatus::Completed, None) => {
                errors.push(format!("task {} is completed without a result", task.id));
            }
            (TaskStatus::Completed, Some(r)) if r.task_id != task.id => {
                errors.push(format!(
                    "result stored under {} belongs to {}",
                    task.id, r.task_id
                ));
            }
            (status, Some(_)) if !status.is_terminal() && status != TaskStatus::Learning => {
                warnings.push(format!("task {} is {} but already has a result", task.id, status));
            }
            _ => {}
        }
    }

    for task_id in checkpoint.state.results.keys() {
        if !seen.contains(task_id.as_str()) {
            errors.push(format!("result for unknown task {}", task_id));
        }
    }

    if !errors.is_empty() {
        IntegrityStatus::Corrupted { errors }
    } else if !warnings.is_empty() {
        IntegrityStatus::Recoverable { warnings }
    } else {
        IntegrityStatus::Valid
    }
}
