//! Orchestrator configuration
//!
//! Every field has a default so an empty TOML file (or no file at all) is a
//! valid configuration. Loading order is: defaults, TOML file, environment
//! overrides, validation.
//!
//! ```toml
//! [consensus]
//! policies = ["conservative", "aggressive", "minimal"]
//! verifiers = ["qa_sentinel", "architect"]
//!
//! [dispatcher]
//! max_parallel_tasks = 4
//! checkpoint_interval_secs = 60
//!
//! [checkpoint]
//! dir = "./state/checkpoints"
//! retention = 10
//!
//! [memory]
//! dir = "./state/memory"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consensus::Policy;
use crate::resilience::RetryPolicy;
use crate::router::{ComplexityWeights, RoutingRule, RoutingTable};
use crate::task::AgentId;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level configuration for the orchestration engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub consensus: ConsensusConfig,
    pub dispatcher: DispatcherConfig,
    pub checkpoint: CheckpointConfig,
    pub state_bus: StateBusConfig,
    pub routing: RoutingConfig,
    pub memory: MemoryConfig,
}

/// Consensus engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// One generation call per policy, in this order
    pub policies: Vec<Policy>,
    /// Verifier roles applied to every candidate
    pub verifiers: Vec<AgentId>,
    /// Arbiter identity
    pub arbiter: AgentId,
    pub generation_timeout_ms: u64,
    pub verification_timeout_ms: u64,
    pub arbiter_timeout_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            policies: vec![Policy::Conservative, Policy::Aggressive, Policy::Minimal],
            verifiers: vec!["qa_sentinel".to_string(), "architect".to_string()],
            arbiter: "consensus_judge".to_string(),
            generation_timeout_ms: 120_000,
            verification_timeout_ms: 60_000,
            arbiter_timeout_ms: 60_000,
        }
    }
}

impl ConsensusConfig {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_millis(self.verification_timeout_ms)
    }

    pub fn arbiter_timeout(&self) -> Duration {
        Duration::from_millis(self.arbiter_timeout_ms)
    }
}

/// Dispatcher admission, timeout and checkpoint cadence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum tasks in the pipeline at once
    pub max_parallel_tasks: usize,
    /// Maximum concurrent generation/verification/arbiter calls
    pub agent_capacity: usize,
    /// Global per-task timeout
    pub task_timeout_secs: u64,
    /// Write a checkpoint after every terminal transition
    pub checkpoint_on_terminal: bool,
    /// Optional fixed checkpoint interval
    pub checkpoint_interval_secs: Option<u64>,
    /// Retry policy for checkpoint writes
    pub checkpoint_retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 4,
            agent_capacity: 8,
            task_timeout_secs: 300,
            checkpoint_on_terminal: true,
            checkpoint_interval_secs: None,
            checkpoint_retry: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn checkpoint_interval(&self) -> Option<Duration> {
        self.checkpoint_interval_secs.map(Duration::from_secs)
    }
}

/// Durable checkpoint storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub dir: PathBuf,
    /// Number of checkpoints kept after pruning
    pub retention: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./hydra-state/checkpoints"),
            retention: 10,
        }
    }
}

/// State bus backing log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateBusConfig {
    /// Directory for file-backed topic logs; in-memory when unset
    pub dir: Option<PathBuf>,
    /// Wake-up channel capacity
    pub channel_capacity: usize,
}

impl Default for StateBusConfig {
    fn default() -> Self {
        Self {
            dir: None,
            channel_capacity: 256,
        }
    }
}

/// Routing rule table and complexity weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Ordered rules, evaluated top-down
    pub rules: Vec<RoutingRule>,
    /// Agent chosen when no rule matches
    pub default_agent: AgentId,
    pub complexity: ComplexityWeights,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            rules: RoutingTable::default_rules(),
            default_agent: "architect".to_string(),
            complexity: ComplexityWeights::default(),
        }
    }
}

impl RoutingConfig {
    /// Build the routing table described by this section
    pub fn table(&self) -> RoutingTable {
        RoutingTable::new(self.rules.clone(), self.default_agent.clone())
    }
}

/// Memory bridge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum recalled patterns appended to a prompt
    pub recall_limit: usize,
    /// Language tag used when a task carries no hint
    pub default_language: String,
    /// Whether winners are fed back into the store
    pub learn: bool,
    /// Directory for the persistent pattern file; in-process when unset
    pub dir: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recall_limit: 5,
            default_language: "python".to_string(),
            learn: true,
            dir: None,
        }
    }
}

impl OrchestratorConfig {
    /// Load from a TOML file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw)?;
        config.apply_env()?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded orchestrator config");
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `HYDRA_*` environment variables
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        if let Some(v) = env_parse::<usize>("HYDRA_MAX_PARALLEL_TASKS")? {
            self.dispatcher.max_parallel_tasks = v;
        }
        if let Some(v) = env_parse::<usize>("HYDRA_AGENT_CAPACITY")? {
            self.dispatcher.agent_capacity = v;
        }
        if let Some(v) = env_parse::<u64>("HYDRA_TASK_TIMEOUT_SECS")? {
            self.dispatcher.task_timeout_secs = v;
        }
        if let Ok(dir) = std::env::var("HYDRA_CHECKPOINT_DIR") {
            self.checkpoint.dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("HYDRA_BUS_DIR") {
            self.state_bus.dir = Some(PathBuf::from(dir));
        }
        if let Ok(dir) = std::env::var("HYDRA_MEMORY_DIR") {
            self.memory.dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.consensus.policies.is_empty() {
            return Err(ConfigError::Invalid(
                "consensus.policies must not be empty".into(),
            ));
        }
        if self.consensus.verifiers.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "consensus.verifiers needs at least 2 roles, got {}",
                self.consensus.verifiers.len()
            )));
        }
        if self.dispatcher.max_parallel_tasks == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.max_parallel_tasks must be > 0".into(),
            ));
        }
        if self.dispatcher.agent_capacity == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.agent_capacity must be > 0".into(),
            ));
        }
        if self.dispatcher.task_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.task_timeout_secs must be > 0".into(),
            ));
        }
        if self.checkpoint.retention == 0 {
            return Err(ConfigError::Invalid(
                "checkpoint.retention must be > 0".into(),
            ));
        }
        if self.state_bus.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "state_bus.channel_capacity must be > 0".into(),
            ));
        }
        if self.routing.default_agent.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "routing.default_agent must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(var: &'static str) -> ConfigResult<Option<T>> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        Err(_) => Ok(None),
    }
}
