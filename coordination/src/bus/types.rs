//! State-bus entries and event payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointId;
use crate::consensus::{CandidateId, DecidedBy};
use crate::dispatcher::MetricsSnapshot;
use crate::task::{AgentId, Priority, TaskId, TaskStatus};

/// Per-topic sequence number, starting at 0
pub type Sequence = u64;

/// Task lifecycle transitions
pub const TOPIC_STATUS: &str = "status";
/// Metric snapshots after every terminal transition
pub const TOPIC_METRICS: &str = "metrics";
/// Checkpoint publications and write failures
pub const TOPIC_CHECKPOINTS: &str = "checkpoints";

/// Payload of a state-bus entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    TaskSubmitted {
        task_id: TaskId,
        priority: Priority,
    },
    StatusChanged {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<AgentId>,
    },
    ConsensusReached {
        task_id: TaskId,
        winner_id: CandidateId,
        score: f64,
        iterations: usize,
        decided_by: DecidedBy,
    },
    Metrics(MetricsSnapshot),
    CheckpointWritten {
        checkpoint_id: CheckpointId,
        tasks: usize,
    },
    CheckpointFailed {
        error: String,
    },
}

impl BusEvent {
    /// Short event-type name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskSubmitted { .. } => "task_submitted",
            Self::StatusChanged { .. } => "status_changed",
            Self::ConsensusReached { .. } => "consensus_reached",
            Self::Metrics(_) => "metrics",
            Self::CheckpointWritten { .. } => "checkpoint_written",
            Self::CheckpointFailed { .. } => "checkpoint_failed",
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskSubmitted { task_id, .. }
            | Self::StatusChanged { task_id, .. }
            | Self::ConsensusReached { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

/// One appended entry of a topic log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEntry {
    pub topic: String,
    pub seq: Sequence,
    pub published_at: DateTime<Utc>,
    pub event: BusEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::FailureReason;

    #[test]
    fn test_event_json_shape() {
        let event = BusEvent::StatusChanged {
            task_id: "t5".into(),
            from: TaskStatus::Pending,
            to: TaskStatus::Failed(FailureReason::DependencyFailed),
            agent: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["to"]["reason"], "dependency-failed");
        assert_eq!(event.task_id(), Some("t5"));
    }
}
