//! Task lifecycle state machine: explicit states and legal transition guards.
//!
//! ```text
//! Pending → Routed → Recalling → Generating → Verifying → Voting → Learning → Completed
//!    └──────────┴──────────┴───────────┴───────────┴─────────┴─────────┴──→ Failed(reason)
//! ```
//!
//! Transitions are one-directional. The only backwards edge is an explicit
//! retry, which moves a retryable `Failed` task back to `Pending`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Human-readable reason tag attached to a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// No candidate survived generation
    Generation,
    /// No candidate received a successful verification
    Verification,
    /// A (transitive) dependency ended in `Failed`
    DependencyFailed,
    /// Cancelled before reaching a terminal state
    Cancelled,
    /// Exceeded the global per-task timeout
    Timeout,
}

impl FailureReason {
    /// Whether an explicit retry may move the task back to `Pending`.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Generation | Self::Verification | Self::Timeout)
    }

    /// The reason tag as shown to users.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Verification => "verification",
            Self::DependencyFailed => "dependency-failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, waiting for admission.
    #[default]
    Pending,
    /// Generator and verifier identities chosen.
    Routed,
    /// Querying the memory store for prior patterns.
    Recalling,
    /// Fan-out generation of candidates.
    Generating,
    /// Fan-out verification of surviving candidates.
    Verifying,
    /// Arbiter vote (or fallback selection).
    Voting,
    /// Winner recorded; pattern extraction scheduled.
    Learning,
    /// Terminal success.
    Completed,
    /// Terminal failure with a reason tag.
    Failed(FailureReason),
}

impl TaskStatus {
    /// Whether this is a terminal state (no further forward transitions).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    /// Position along the forward pipeline; terminal failure has none.
    fn stage(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Routed => Some(1),
            Self::Recalling => Some(2),
            Self::Generating => Some(3),
            Self::Verifying => Some(4),
            Self::Voting => Some(5),
            Self::Learning => Some(6),
            Self::Completed => Some(7),
            Self::Failed(_) => None,
        }
    }

    /// Legal edges of the lifecycle graph.
    ///
    /// Forward moves advance exactly one stage; any non-terminal state may
    /// fail; a retryable failure may return to `Pending`.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        match (self, to) {
            (Self::Failed(reason), Self::Pending) => reason.is_retryable(),
            (from, Self::Failed(_)) => !from.is_terminal(),
            (from, to) => match (from.stage(), to.stage()) {
                (Some(a), Some(b)) => !from.is_terminal() && b == a + 1,
                _ => false,
            },
        }
    }

    /// The failure reason, if failed.
    pub fn failure_reason(self) -> Option<FailureReason> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Routed => write!(f, "routed"),
            Self::Recalling => write!(f, "recalling"),
            Self::Generating => write!(f, "generating"),
            Self::Verifying => write!(f, "verifying"),
            Self::Voting => write!(f, "voting"),
            Self::Learning => write!(f, "learning"),
            Self::Completed => write!(f, "completed"),
            Self::Failed(reason) => write!(f, "failed({})", reason),
        }
    }
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Illegal task transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}
