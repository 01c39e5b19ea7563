//! Agent-capacity ceiling shared by every external service call.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Held for the duration of one generation, verification or arbiter call
#[derive(Debug)]
pub struct CapacityPermit {
    _permit: OwnedSemaphorePermit,
}

/// The limiter was closed; no further calls will be admitted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Agent capacity limiter closed")]
pub struct CapacityClosed;

/// Counting limiter on concurrent service calls
#[derive(Debug, Clone)]
pub struct CapacityLimiter {
    semaphore: Arc<Semaphore>,
    ceiling: usize,
}

impl CapacityLimiter {
    pub fn new(ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(ceiling)),
            ceiling,
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<CapacityPermit, CapacityClosed> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CapacityClosed)?;
        Ok(CapacityPermit { _permit: permit })
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Slots not currently held
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Refuse all future acquisitions
    pub fn close(&self) {
        self.semaphore.close();
    }
}
