//! Dispatcher error types

use crate::bus::StateBusError;
use crate::checkpoint::CheckpointError;
use crate::task::{FailureReason, IllegalTransition, TaskId, TaskStatus, ValidationError};

/// Error type for dispatcher operations
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Task graph rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Task {task_id} is {status}, not runnable")]
    NotRunnable { task_id: TaskId, status: TaskStatus },

    #[error("Task {task_id} waits on unfinished dependencies: {}", .pending.join(", "))]
    DependenciesPending {
        task_id: TaskId,
        pending: Vec<TaskId>,
    },

    /// The task reached `Failed`; the reason tag is what users see
    #[error("Task {task_id} failed: {reason}")]
    Failed {
        task_id: TaskId,
        reason: FailureReason,
    },

    #[error("Task {task_id} is {status} and cannot be retried")]
    NotRetryable { task_id: TaskId, status: TaskStatus },

    #[error("Cannot recover while {0} tasks are running")]
    Busy(usize),

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("State bus error: {0}")]
    Bus(#[from] StateBusError),
}

impl DispatchError {
    /// The reason tag when this error reports a failed task
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Result type for dispatcher operations
pub type DispatchResult<T> = Result<T, DispatchError>;
