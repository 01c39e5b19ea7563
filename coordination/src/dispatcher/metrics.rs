//! Orchestration metrics
//!
//! Counters are updated by the dispatcher only; everyone else sees
//! immutable snapshots (metrics lookups, the `metrics` bus topic and the
//! checkpoint's global state).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::{AgentId, FailureReason, TaskStatus};

/// Per-agent counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Tasks this agent generated for that reached a terminal state
    pub tasks: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
}

impl AgentMetrics {
    pub fn mean_duration_ms(&self) -> f64 {
        if self.tasks > 0 {
            self.total_duration_ms as f64 / self.tasks as f64
        } else {
            0.0
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    /// Failures other than cancellation
    pub failed: u64,
    pub cancelled: u64,
    /// Tasks whose pipeline actually ran (excludes dependency failures)
    pub executed: u64,
    pub candidates_generated: u64,
    /// Requested candidates that timed out, errored or came back empty
    pub candidates_dropped: u64,
    pub fallback_votes: u64,
    pub checkpoint_failures: u64,
    pub learn_failures: u64,
    pub retries: u64,
    pub total_duration_ms: u64,
    /// completed / terminal, 0.0 before the first terminal transition
    pub success_rate: f64,
    pub mean_duration_ms: f64,
    pub agents: BTreeMap<AgentId, AgentMetrics>,
}

impl MetricsSnapshot {
    /// Tasks that reached a terminal status
    pub fn terminal(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}

/// Mutable counters owned by the dispatcher
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    counters: MetricsSnapshot,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue counting from a restored snapshot
    pub fn from_snapshot(snapshot: MetricsSnapshot) -> Self {
        let mut collector = Self { counters: snapshot };
        collector.refresh_derived();
        collector
    }

    pub fn record_submitted(&mut self, count: usize) {
        self.counters.submitted += count as u64;
    }

    pub fn record_candidates(&mut self, generated: usize, requested: usize) {
        self.counters.candidates_generated += generated as u64;
        self.counters.candidates_dropped += requested.saturating_sub(generated) as u64;
    }

    pub fn record_fallback_vote(&mut self) {
        self.counters.fallback_votes += 1;
    }

    pub fn record_checkpoint_failure(&mut self) {
        self.counters.checkpoint_failures += 1;
    }

    pub fn record_learn_failures(&mut self, count: usize) {
        self.counters.learn_failures += count as u64;
    }

    pub fn record_retry(&mut self) {
        self.counters.retries += 1;
    }

    /// Count a terminal transition.
    ///
    /// `duration` is `None` for tasks that never entered the pipeline.
    pub fn record_terminal(
        &mut self,
        status: TaskStatus,
        agent: Option<&str>,
        duration: Option<Duration>,
    ) {
        let failed = match status {
            TaskStatus::Completed => {
                self.counters.completed += 1;
                false
            }
            TaskStatus::Failed(FailureReason::Cancelled) => {
                self.counters.cancelled += 1;
                true
            }
            TaskStatus::Failed(_) => {
                self.counters.failed += 1;
                true
            }
            _ => return,
        };

        let millis = duration.map(|d| d.as_millis() as u64).unwrap_or(0);
        if duration.is_some() {
            self.counters.executed += 1;
            self.counters.total_duration_ms += millis;
        }

        if let Some(agent) = agent {
            let entry = self.counters.agents.entry(agent.to_string()).or_default();
            entry.tasks += 1;
            entry.total_duration_ms += millis;
            if failed {
                entry.failures += 1;
            }
        }

        self.refresh_derived();
    }

    fn refresh_derived(&mut self) {
        let terminal = self.counters.terminal();
        self.counters.success_rate = if terminal > 0 {
            self.counters.completed as f64 / terminal as f64
        } else {
            0.0
        };
        self.counters.mean_duration_ms = if self.counters.executed > 0 {
            self.counters.total_duration_ms as f64 / self.counters.executed as f64
        } else {
            0.0
        };
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.counters.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_accounting() {
        let mut m = MetricsCollector::new();
        m.record_submitted(3);
        m.record_terminal(
            TaskStatus::Completed,
            Some("architect"),
            Some(Duration::from_millis(300)),
        );
        m.record_terminal(
            TaskStatus::Failed(FailureReason::Generation),
            Some("architect"),
            Some(Duration::from_millis(100)),
        );
        m.record_terminal(TaskStatus::Failed(FailureReason::DependencyFailed), None, None);

        let s = m.snapshot();
        assert_eq!(s.completed, 1);
        assert_eq!(s.failed, 2);
        assert_eq!(s.executed, 2);
        assert!((s.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((s.mean_duration_ms - 200.0).abs() < 1e-9);

        let architect = &s.agents["architect"];
        assert_eq!(architect.tasks, 2);
        assert_eq!(architect.failures, 1);
        assert!((architect.mean_duration_ms() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_cancelled_counted_separately() {
        let mut m = MetricsCollector::new();
        m.record_terminal(TaskStatus::Failed(FailureReason::Cancelled), None, None);
        let s = m.snapshot();
        assert_eq!(s.cancelled, 1);
        assert_eq!(s.failed, 0);
        assert_eq!(s.success_rate, 0.0);
    }

    #[test]
    fn test_non_terminal_status_ignored() {
        let mut m = MetricsCollector::new();
        m.record_terminal(TaskStatus::Voting, Some("x"), Some(Duration::from_secs(1)));
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_candidate_drops() {
        let mut m = MetricsCollector::new();
        m.record_candidates(2, 3);
        m.record_candidates(3, 3);
        let s = m.snapshot();
        assert_eq!(s.candidates_generated, 5);
        assert_eq!(s.candidates_dropped, 1);
    }

    #[test]
    fn test_restore_continues_counting() {
        let mut m = MetricsCollector::new();
        m.record_terminal(TaskStatus::Completed, None, Some(Duration::from_millis(10)));
        let mut restored = MetricsCollector::from_snapshot(m.snapshot());
        restored.record_terminal(TaskStatus::Completed, None, Some(Duration::from_millis(30)));
        let s = restored.snapshot();
        assert_eq!(s.completed, 2);
        assert!((s.mean_duration_ms - 20.0).abs() < 1e-9);
    }
}
