//! Resilience: degraded results and retry with backoff
//!
//! Collaborator failures that must not fail a task are absorbed here:
//!
//! ```text
//! Memory recall
//!   ├─ store answers      → Degraded { level: Full, payload }
//!   └─ store unavailable  → Degraded { level: Unavailable, payload: empty, warnings }
//!
//! Checkpoint write
//!   └─ RetryPolicy::run   → attempt, sleep(base * 2^n), attempt, … give up
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// How much of a collaborator's capability backed a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// Collaborator answered normally.
    Full,
    /// Collaborator failed; the payload is a best-effort substitute.
    Unavailable,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// A result wrapped with degradation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degraded<T> {
    /// The actual payload.
    pub payload: T,
    /// Degradation level.
    pub level: DegradationLevel,
    /// Diagnostics explaining the degradation.
    pub warnings: Vec<String>,
}

impl<T> Degraded<T> {
    /// A normal answer.
    pub fn full(payload: T) -> Self {
        Self {
            payload,
            level: DegradationLevel::Full,
            warnings: Vec::new(),
        }
    }

    /// A best-effort substitute after a failure.
    pub fn unavailable(payload: T, warning: impl Into<String>) -> Self {
        Self {
            payload,
            level: DegradationLevel::Unavailable,
            warnings: vec![warning.into()],
        }
    }

    /// Whether any degradation occurred.
    pub fn is_degraded(&self) -> bool {
        self.level != DegradationLevel::Full
    }

    /// Drop the metadata.
    pub fn into_inner(self) -> T {
        self.payload
    }
}

/// Exponential backoff retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    #[serde(with = "duration_millis")]
    pub base_backoff: Duration,
    /// Upper bound on a single delay.
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt number `attempt` (1-based; attempt 1 has none).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds or attempts are exhausted.
    ///
    /// Returns the last error when every attempt failed.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    let delay = self.backoff_for(attempt + 1);
                    warn!(
                        op = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Serde helper storing a `Duration` as integer milliseconds.
pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
