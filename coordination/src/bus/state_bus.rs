//! State Bus
//!
//! Per-topic ordered publication over an `EventLog`, with a broadcast
//! channel used only as a wake-up signal for live subscribers. The log is
//! the source of truth: a subscriber that misses a wake-up (lag, restart)
//! catches up by reading from its own offset.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::broadcast;
use tracing::debug;

use super::log::{
    validate_topic, FileEventLog, MemoryEventLog, SharedEventLog, StateBusResult,
};
use super::types::{BusEntry, BusEvent, Sequence};
use crate::config::StateBusConfig;

/// Entries fetched from the log per read
const READ_BATCH: usize = 64;

/// Shared reference to StateBus
pub type SharedStateBus = Arc<StateBus>;

/// Ordered topic publication with restartable subscriptions
pub struct StateBus {
    log: SharedEventLog,
    notifier: broadcast::Sender<(String, Sequence)>,
}

impl StateBus {
    pub fn new(log: SharedEventLog, channel_capacity: usize) -> Self {
        let (notifier, _) = broadcast::channel(channel_capacity.max(1));
        Self { log, notifier }
    }

    /// Bus over a process-local log
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryEventLog::new()), 256)
    }

    /// File-backed when a directory is configured, in-memory otherwise
    pub fn from_config(config: &StateBusConfig) -> Self {
        let log: SharedEventLog = match &config.dir {
            Some(dir) => Arc::new(FileEventLog::new(dir.clone())),
            None => Arc::new(MemoryEventLog::new()),
        };
        Self::new(log, config.channel_capacity)
    }

    /// Create a shared reference to this bus
    pub fn shared(self) -> SharedStateBus {
        Arc::new(self)
    }

    /// Append `event` to `topic` and wake subscribers
    pub async fn publish(&self, topic: &str, event: BusEvent) -> StateBusResult<Sequence> {
        let event_type = event.event_type();
        let entry = self.log.append(topic, event).await?;
        debug!(topic, seq = entry.seq, event_type, "Published bus event");

        // No receivers is fine; the log already holds the entry
        let _ = self.notifier.send((entry.topic, entry.seq));
        Ok(entry.seq)
    }

    /// Lazy, restartable reader of `topic` starting at `from`
    pub fn subscribe(&self, topic: &str, from: Sequence) -> StateBusResult<Subscription> {
        validate_topic(topic)?;
        Ok(Subscription {
            topic: topic.to_string(),
            next_seq: from,
            log: Arc::clone(&self.log),
            wake: self.notifier.subscribe(),
            buffer: VecDeque::new(),
            poll: None,
        })
    }

    /// Next sequence number `topic` will assign
    pub async fn head(&self, topic: &str) -> StateBusResult<Sequence> {
        self.log.head(topic).await
    }

    /// One-shot read without a subscription
    pub async fn read(
        &self,
        topic: &str,
        from: Sequence,
        limit: usize,
    ) -> StateBusResult<Vec<BusEntry>> {
        self.log.read_from(topic, from, limit).await
    }
}

impl Default for StateBus {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// A consumer-owned cursor over one topic.
///
/// Delivery is at-least-once across restarts: persist `offset()` after
/// handling an entry and resubscribe from it.
pub struct Subscription {
    topic: String,
    next_seq: Sequence,
    log: SharedEventLog,
    wake: broadcast::Receiver<(String, Sequence)>,
    buffer: VecDeque<BusEntry>,
    /// Re-read interval for logs written by another process
    poll: Option<Duration>,
}

impl Subscription {
    /// Also re-check the log on this interval while waiting
    pub fn poll_every(mut self, interval: Duration) -> Self {
        self.poll = Some(interval);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Sequence number of the next entry this subscription will yield
    pub fn offset(&self) -> Sequence {
        self.next_seq
    }

    fn take_buffered(&mut self) -> Option<BusEntry> {
        let entry = self.buffer.pop_front()?;
        self.next_seq = entry.seq + 1;
        Some(entry)
    }

    async fn fill(&mut self) -> StateBusResult<bool> {
        let batch = self
            .log
            .read_from(&self.topic, self.next_seq, READ_BATCH)
            .await?;
        let filled = !batch.is_empty();
        self.buffer.extend(batch);
        Ok(filled)
    }

    /// Next entry without waiting; `None` when caught up
    pub async fn try_next(&mut self) -> StateBusResult<Option<BusEntry>> {
        if self.buffer.is_empty() {
            self.fill().await?;
        }
        Ok(self.take_buffered())
    }

    /// Next entry, waiting for a publication when caught up.
    ///
    /// Returns `None` once the bus has been dropped and the log is drained.
    pub async fn next(&mut self) -> StateBusResult<Option<BusEntry>> {
        loop {
            if let Some(entry) = self.take_buffered() {
                return Ok(Some(entry));
            }
            if self.fill().await? {
                continue;
            }
            if !self.wait().await {
                // Bus gone: drain anything published just before it closed
                self.fill().await?;
                return Ok(self.take_buffered());
            }
        }
    }

    /// Wait for a wake-up on this topic; false when the sender is gone
    async fn wait(&mut self) -> bool {
        loop {
            let received = match self.poll {
                Some(interval) => {
                    match tokio::time::timeout(interval, self.wake.recv()).await {
                        Ok(received) => received,
                        Err(_) => return true,
                    }
                }
                None => self.wake.recv().await,
            };
            match received {
                Ok((topic, _)) if topic == self.topic => return true,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(topic = %self.topic, skipped, "Subscriber lagged; re-reading log");
                    return true;
                }
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    }

    /// Adapt into a `Stream`; ends after the first error or when the bus closes
    pub fn into_stream(self) -> impl Stream<Item = StateBusResult<BusEntry>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut sub = state?;
            match sub.next().await {
                Ok(Some(entry)) => Some((Ok(entry), Some(sub))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
