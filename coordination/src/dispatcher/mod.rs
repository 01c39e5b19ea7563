//! Task Dispatcher
//!
//! Composes router, consensus engine, memory bridge, checkpoint manager and
//! state bus into the end-to-end task lifecycle. Collaborators are passed
//! in explicitly so tests can substitute any of them.

pub mod engine;
pub mod error;
pub mod metrics;
pub mod table;

pub use engine::{BatchReport, Collaborators, RecoveryReport, SharedDispatcher, TaskDispatcher};
pub use error::{DispatchError, DispatchResult};
pub use metrics::{AgentMetrics, MetricsCollector, MetricsSnapshot};
pub use table::TaskTable;
