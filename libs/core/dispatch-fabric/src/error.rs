//! Error types for dispatch operations.
//!
//! This module provides:
//! - `DispatchError` - The main error type for fabric operations
//! - `ErrorKind` - The tag carried on failure messages and used for retry decisions
//! - `RetryBackoff` - Delay calculation for retried jobs

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while submitting, executing, or streaming a job.
///
/// Executors report their own failures as tagged variants; the dispatcher
/// never inspects error strings to decide whether to retry.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// The scope governing the operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The per-job deadline expired before the executor finished.
    #[error("job timed out after {0:?}")]
    Timeout(Duration),

    /// Recoverable executor fault (I/O, network). Retriable.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unrecoverable executor fault (bad input, policy violation). Not retriable.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Non-blocking submit found the queue at capacity.
    #[error("queue is full")]
    QueueFull,

    /// Submit attempted after the queue was closed.
    #[error("queue is closed")]
    QueueClosed,

    /// Unexpected executor crash. Not retried, to avoid retry storms on buggy executors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid configuration detected at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DispatchError {
    /// The tag for this error, as carried on failure messages.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Permanent(_) => ErrorKind::Permanent,
            Self::QueueFull => ErrorKind::QueueFull,
            Self::QueueClosed => ErrorKind::QueueClosed,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether a job failing with this error may be re-enqueued.
    ///
    /// Only transient faults and expired deadlines qualify; cancellation is
    /// terminal for the affected job, and internal errors are deliberately
    /// excluded so a buggy executor cannot trigger a retry storm.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Error tag propagated on failure messages, never as opaque strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Cancelled,
    Timeout,
    Transient,
    Permanent,
    QueueFull,
    QueueClosed,
    Internal,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::QueueFull => "queue_full",
            Self::QueueClosed => "queue_closed",
            Self::Internal => "internal",
            Self::Config => "config",
        }
    }
}

/// Exponential backoff with jitter for retried jobs.
///
/// The delay for attempt `n` is `base × 2^n`, capped at `max`, with ±25%
/// jitter applied to prevent thundering herd on shared downstreams.
#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Calculate the delay before re-enqueueing a job that failed on `attempt`.
    ///
    /// `attempt` is the retry count of the attempt that just failed (0 for
    /// the first execution).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exp_delay = base_ms.saturating_mul(2u64.saturating_pow(attempt.min(16)));
        let capped_delay = exp_delay.min(self.max_delay.as_millis() as u64);

        Duration::from_millis(Self::apply_jitter(capped_delay))
    }

    /// Apply jitter to a delay (±25% randomness).
    ///
    /// Returns the delay with jitter applied, keeping it within ±25% of the original.
    fn apply_jitter(delay_ms: u64) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        use std::time::SystemTime;

        // Simple pseudo-random based on current time
        let mut hasher = DefaultHasher::new();
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
            .hash(&mut hasher);
        let hash = hasher.finish();

        // Calculate jitter range as ±25% of delay
        let jitter_range = delay_ms / 4;
        if jitter_range == 0 {
            return delay_ms;
        }

        // Map hash to range [0, 2*jitter_range] then shift to [-jitter_range, +jitter_range]
        let random_offset = (hash % (jitter_range * 2 + 1)) as i64 - jitter_range as i64;

        if random_offset < 0 {
            delay_ms.saturating_sub((-random_offset) as u64)
        } else {
            delay_ms.saturating_add(random_offset as u64)
        }
    }
}
