//! Multi-Model Router
//!
//! Maps a task to the agents that act on it and decides how runnable tasks
//! may be grouped:
//!
//! ```text
//! Task ──► compute_complexity ──► RoutingTable::route ──► primary generator
//!                                                    └──► fixed verifier set
//!
//! [ready tasks] ──► group_for_parallel_execution(cap) ──► [[t1, t3], [t2]]
//! ```
//!
//! The router also owns the agent-capacity ceiling: every generation,
//! verification and arbiter call holds a `CapacityPermit` while in flight.

pub mod capacity;
pub mod complexity;
pub mod grouping;
pub mod rules;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use capacity::{CapacityClosed, CapacityLimiter, CapacityPermit};
pub use complexity::{compute_complexity, ComplexityWeights, SignalWeight};
pub use grouping::{group_for_parallel_execution, ready_tasks};
pub use rules::{RouteDecision, RoutingRule, RoutingTable, RuleCondition};

use crate::config::OrchestratorConfig;
use crate::task::{AgentId, Task, TaskId};

/// Shared reference to a Router
pub type SharedRouter = Arc<Router>;

/// Agents selected for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSelection {
    /// Primary generator identity
    pub generator: AgentId,
    /// Verifier roles, independent of task content
    pub verifiers: Vec<AgentId>,
    pub complexity: f64,
    /// Name of the rule that chose the generator
    pub rule: String,
}

/// Task-to-agent router
#[derive(Debug, Clone)]
pub struct Router {
    table: RoutingTable,
    weights: ComplexityWeights,
    verifiers: Vec<AgentId>,
    capacity: CapacityLimiter,
}

impl Router {
    pub fn new(
        table: RoutingTable,
        weights: ComplexityWeights,
        verifiers: Vec<AgentId>,
        capacity: CapacityLimiter,
    ) -> Self {
        Self {
            table,
            weights,
            verifiers,
            capacity,
        }
    }

    /// Build from the routing, consensus and dispatcher sections
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(
            config.routing.table(),
            config.routing.complexity.clone(),
            config.consensus.verifiers.clone(),
            CapacityLimiter::new(config.dispatcher.agent_capacity),
        )
    }

    pub fn shared(self) -> SharedRouter {
        Arc::new(self)
    }

    pub fn compute_complexity(&self, task: &Task) -> f64 {
        compute_complexity(task, &self.weights)
    }

    /// Primary generator plus the fixed verifier set
    pub fn select_agents(&self, task: &Task) -> AgentSelection {
        let complexity = self.compute_complexity(task);
        let decision = self.table.route(task, complexity);
        debug!(
            task_id = %task.id,
            agent = %decision.agent,
            rule = %decision.rule,
            complexity,
            "Routed task"
        );
        AgentSelection {
            generator: decision.agent,
            verifiers: self.verifiers.clone(),
            complexity,
            rule: decision.rule,
        }
    }

    pub fn group_for_parallel_execution(&self, tasks: &[Task], cap: usize) -> Vec<Vec<TaskId>> {
        group_for_parallel_execution(tasks, cap)
    }

    /// Limiter shared with the consensus engine
    pub fn capacity(&self) -> &CapacityLimiter {
        &self.capacity
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_agents_uses_fixed_verifiers() {
        let router = Router::from_config(&OrchestratorConfig::default());
        let frontend = Task::new("t1", "UI", "react component")
            .with_metadata("language", json!("tsx"));
        let backend = Task::new("t2", "DB", "database index");

        let a = router.select_agents(&frontend);
        let b = router.select_agents(&backend);
        assert_eq!(a.generator, "worker_frontend");
        assert_eq!(b.generator, "worker_backend");
        assert_eq!(a.verifiers, vec!["qa_sentinel", "architect"]);
        assert_eq!(a.verifiers, b.verifiers);
    }

    #[test]
    fn test_capacity_from_config() {
        let mut config = OrchestratorConfig::default();
        config.dispatcher.agent_capacity = 3;
        let router = Router::from_config(&config);
        assert_eq!(router.capacity().ceiling(), 3);
    }
}
