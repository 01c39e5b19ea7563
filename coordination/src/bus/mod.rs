//! State Bus
//!
//! Durable, ordered event notification between the dispatcher and its
//! observers, without a broker:
//!
//! - `log`: the append + tail-from-offset `EventLog` seam (memory and JSONL)
//! - `state_bus`: publication and restartable subscriptions
//! - `types`: entries, event payloads and topic names

pub mod log;
pub mod state_bus;
pub mod types;

pub use log::{
    validate_topic, EventLog, FileEventLog, MemoryEventLog, SharedEventLog, StateBusError,
    StateBusResult,
};
pub use state_bus::{SharedStateBus, StateBus, Subscription};
pub use types::{BusEntry, BusEvent, Sequence, TOPIC_CHECKPOINTS, TOPIC_METRICS, TOPIC_STATUS};
