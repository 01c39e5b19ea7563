//! Hydra Coordination Library
//!
//! Consensus-driven task orchestration. A pending task gets several
//! independently generated candidates, each candidate is reviewed by
//! independent verifiers, an arbiter (or a deterministic fallback) picks
//! the winner, and the winner feeds a pattern memory. Progress survives a
//! crash through atomic checkpoints and an ordered state bus.
//!
//! # Components
//!
//! - [`task`]: `Task`, lifecycle state machine, dependency graph
//! - [`router`]: complexity scoring, ordered routing rules, grouping,
//!   agent-capacity ceiling
//! - [`consensus`]: generate → verify → vote
//! - [`memory`]: recall before generation, learn after a winner
//! - [`checkpoint`]: durable snapshots with a `LATEST` pointer
//! - [`bus`]: per-topic ordered logs with restartable subscriptions
//! - [`dispatcher`]: composes all of the above
//! - [`services`]: the generation/verification/arbiter seams
//! - [`config`]: TOML + environment configuration
//! - [`resilience`]: degraded results and retry with backoff
//!
//! # Usage
//!
//! ```ignore
//! let config = OrchestratorConfig::load("hydra.toml")?;
//! let dispatcher = TaskDispatcher::from_config(&config, services, store).shared();
//! dispatcher.submit_all(tasks).await?;
//! let report = dispatcher.execute_batch(&ids).await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod bus;
pub mod checkpoint;
pub mod config;
pub mod consensus;
pub mod dispatcher;
pub mod memory;
pub mod resilience;
pub mod router;
pub mod services;
pub mod task;

pub use bus::{BusEntry, BusEvent, SharedStateBus, StateBus, StateBusError, Subscription};
pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointInfo, CheckpointManager, GlobalState,
    SharedCheckpointManager,
};
pub use config::{ConfigError, OrchestratorConfig};
pub use consensus::{
    Candidate, ConsensusEngine, ConsensusError, ConsensusResult, DecidedBy, Policy, Verification,
};
pub use dispatcher::{
    BatchReport, Collaborators, DispatchError, DispatchResult, MetricsSnapshot, RecoveryReport,
    SharedDispatcher, TaskDispatcher,
};
pub use memory::{
    store_from_config, FilePatternStore, InMemoryPatternStore, MemoryBridge, Pattern,
    PatternExtractor, PatternStore, PatternSummary, SharedPatternStore, StoreError,
};
pub use resilience::{Degraded, RetryPolicy};
pub use router::{AgentSelection, CapacityLimiter, Router, RoutingTable};
pub use services::{
    ArbiterDecision, ArbiterRequest, ArbiterService, GenerationRequest, GenerationResponse,
    GenerationService, ServiceError, ServiceSet, TaskContext, VerificationRequest,
    VerificationResponse, VerificationService,
};
pub use task::{FailureReason, Priority, Task, TaskGraph, TaskId, TaskStatus, ValidationError};
