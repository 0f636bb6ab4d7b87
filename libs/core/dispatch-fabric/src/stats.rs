//! Dispatcher statistics.
//!
//! Counters are atomics so workers never serialize on a stats lock;
//! `snapshot` returns a consistent copy for callers.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters maintained by the dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    in_progress: AtomicU64,
    retries: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A producer handed a job to the queue.
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
    }

    /// A worker dequeued a job.
    pub(crate) fn record_started(&self) {
        self.in_progress.fetch_add(1, Ordering::SeqCst);
    }

    /// A job reached a success terminal.
    pub(crate) fn record_success(&self) {
        self.in_progress.fetch_sub(1, Ordering::SeqCst);
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// A job reached a failure or cancelled terminal.
    pub(crate) fn record_failure(&self) {
        self.in_progress.fetch_sub(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// A queued job was discarded at shutdown with a cancelled terminal,
    /// without ever starting.
    pub(crate) fn record_discarded(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// A failed attempt was scheduled for re-enqueue; the job stays open
    /// and will pass through `record_started` again when a worker picks the
    /// retried value up.
    pub(crate) fn record_retry(&self) {
        self.in_progress.fetch_sub(1, Ordering::SeqCst);
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    /// Consistent copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            in_progress: self.in_progress.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time view of the dispatcher counters.
///
/// At any quiescent point, `completed == succeeded + failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_progress: u64,
    pub retries: u64,
}
