//! Checkpoint Manager
//!
//! Durable, atomically published snapshots of the task list and global
//! orchestration state. The manager keeps no state between calls besides
//! the directory it writes to.

pub mod manager;
pub mod types;

pub use manager::{CheckpointError, CheckpointManager, CheckpointResult, SharedCheckpointManager};
pub use types::{
    validate_checkpoint, Checkpoint, CheckpointId, CheckpointInfo, GlobalState, IntegrityStatus,
};
