//! Task & DAG model
//!
//! The entity and dependency graph every other component operates on:
//!
//! - `types`: `Task`, `Priority` and identifier aliases
//! - `status`: the lifecycle state machine and failure reason tags
//! - `graph`: petgraph-backed dependency validation and ordering

pub mod graph;
pub mod status;
pub mod types;

pub use graph::{TaskGraph, ValidationError, ValidationResult};
pub use status::{FailureReason, IllegalTransition, TaskStatus};
pub use types::{AgentId, Priority, Task, TaskId};
