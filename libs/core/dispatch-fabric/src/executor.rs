//! The executor seam.
//!
//! Embedders supply the job semantics; the fabric supplies scheduling,
//! admission, retries, and fan-out. An executor streams incremental
//! messages through the [`ProgressSink`] it is handed and finishes by
//! returning exactly one terminal [`Outcome`] (or an error the dispatcher
//! turns into a failure terminal).

use crate::error::DispatchError;
use crate::hub::Hub;
use crate::job::Job;
use crate::message::{Message, Outcome};
use crate::scope::Scope;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// User-supplied job logic.
///
/// Contract:
/// - obey `scope`: return `Err(DispatchError::Cancelled)` promptly once it fires,
/// - emit incremental output through `sink` in the order it is produced,
/// - never mutate shared dispatcher state.
///
/// The worker publishes the terminal message itself, after this returns.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute one job, streaming incremental messages through `sink`.
    async fn execute(
        &self,
        scope: &Scope,
        job: &Job,
        sink: &ProgressSink,
    ) -> Result<Outcome, DispatchError>;

    /// Executor name for logging and metrics labels.
    fn name(&self) -> &'static str;
}

/// Per-job message sink handed to executors.
///
/// Owns the job's sequence counter, so everything published for the job -
/// including the terminal the worker appends - shares one monotonic
/// numbering and subscribers can detect gaps.
pub struct ProgressSink {
    hub: Arc<Hub>,
    job: Job,
    sequence: AtomicU64,
}

impl ProgressSink {
    /// Build a sink for `job` publishing through `hub`.
    ///
    /// The dispatcher does this per attempt; embedders mostly need it to
    /// exercise an executor directly in tests.
    pub fn new(hub: Arc<Hub>, job: &Job) -> Self {
        Self {
            hub,
            job: job.clone(),
            sequence: AtomicU64::new(job.sequence_base),
        }
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// The sequence the next message would get; the retry path carries this
    /// into the re-enqueued job so numbering continues across attempts.
    pub(crate) fn peek_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub(crate) fn publish(&self, message: Message) -> usize {
        self.hub.publish(message)
    }

    /// Report progress: `step` of `total`, with a free-form note.
    pub fn progress(&self, step: u32, total: u32, note: impl Into<String>) {
        let seq = self.next_sequence();
        self.hub
            .publish(Message::progress(&self.job, seq, step, total, note));
    }

    /// Stream an output fragment.
    pub fn chunk(&self, delta: impl Into<String>) {
        let seq = self.next_sequence();
        self.hub.publish(Message::chunk(&self.job, seq, delta));
    }

    /// Announce a tool invocation.
    pub fn tool_call(&self, name: &str, arguments: serde_json::Value) {
        let seq = self.next_sequence();
        self.hub
            .publish(Message::tool_call(&self.job, seq, name, arguments));
    }

    /// Report a tool's result.
    pub fn tool_result(&self, name: &str, result: serde_json::Value) {
        let seq = self.next_sequence();
        self.hub
            .publish(Message::tool_result(&self.job, seq, name, result));
    }
}
