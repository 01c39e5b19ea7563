//! Consensus data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::policy::Policy;
use crate::task::{AgentId, TaskId};

/// Unique identifier for candidates
pub type CandidateId = String;

/// Error type for a consensus round
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    #[error("No candidates produced for task {0}")]
    NoCandidates(TaskId),

    #[error("No candidate of task {0} received a successful verification")]
    NoVerifiedCandidates(TaskId),

    #[error("Consensus round for task {0} was cancelled")]
    Cancelled(TaskId),
}

/// Result type for consensus round stages
pub type RoundResult<T> = Result<T, ConsensusError>;

/// One generated solution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub task_id: TaskId,
    pub policy: Policy,
    pub content: String,
    pub generator: AgentId,
    pub created_at: DateTime<Utc>,
    /// Set when the generation call failed; such candidates never reach voting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Candidate {
    pub fn new(task_id: &str, policy: Policy, generator: &str, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            policy,
            content,
            generator: generator.to_string(),
            created_at: Utc::now(),
            failure: None,
        }
    }

    /// A placeholder recording why a policy produced nothing
    pub fn failed(task_id: &str, policy: Policy, generator: &str, reason: String) -> Self {
        Self {
            failure: Some(reason),
            ..Self::new(task_id, policy, generator, String::new())
        }
    }

    pub fn is_usable(&self) -> bool {
        self.failure.is_none()
    }
}

/// One verifier's review of one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub candidate_id: CandidateId,
    pub verifier: AgentId,
    /// Clamped to [0, 1]
    pub score: f64,
    pub issues: Vec<String>,
    pub passed: bool,
}

/// How the winner was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecidedBy {
    Arbiter,
    /// Highest mean verification score after an arbiter failure
    Fallback,
}

/// Outcome of one voting round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub task_id: TaskId,
    pub winner_id: CandidateId,
    /// Consensus score in [0, 1]
    pub score: f64,
    pub reasoning: String,
    /// Candidates considered at voting time
    pub iterations: usize,
    pub decided_by: DecidedBy,
    pub timestamp: DateTime<Utc>,
}

/// A consensus result together with the pool it was chosen from
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusOutcome {
    pub result: ConsensusResult,
    pub winner: Candidate,
    pub candidates: Vec<Candidate>,
    pub verifications: Vec<Verification>,
}
