//! Job values carried through the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Identifier correlating a job with its result stream.
pub type JobId = Uuid;

/// A unit of work submitted to the fabric.
///
/// The payload is opaque to the dispatcher; only the routing key (which
/// selects the subscribers that observe this job's messages) and the retry
/// count are interpreted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Stable identifier, preserved across retries.
    pub id: JobId,

    /// Correlation key subscribers register against (conversation/session id).
    pub routing_key: String,

    /// Opaque payload handed to the executor.
    pub payload: serde_json::Value,

    /// Number of times this job has been re-enqueued after a failure.
    pub retry_count: u32,

    /// When the job was first submitted.
    pub submitted_at: DateTime<Utc>,

    /// Per-job deadline override; the fabric default applies when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// First sequence number for this attempt's messages. Advances across
    /// retries so the job's stream stays monotonic for subscribers.
    #[serde(default)]
    pub sequence_base: u64,
}

impl Job {
    /// Create a new job with a fresh id and a zero retry count.
    pub fn new(routing_key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            routing_key: routing_key.into(),
            payload,
            retry_count: 0,
            submitted_at: Utc::now(),
            timeout: None,
            sequence_base: 0,
        }
    }

    /// Override the execution deadline for this job only.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Create the value re-enqueued after a retriable failure.
    ///
    /// Same identifier, incremented retry counter; no in-flight state from
    /// the failed attempt is carried over.
    pub fn with_retry(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    /// Check if the job has exhausted its retry budget.
    pub fn exceeded_max_retries(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}
