//! Message envelope delivered to subscribers.
//!
//! A single job produces zero or more progress/chunk/tool messages followed
//! by exactly one terminal (`success`, `failure`, or `cancelled`). Heartbeats
//! are interleaved per subscriber by the session writer and carry their own
//! sequence numbering.

use crate::error::DispatchError;
use crate::job::{Job, JobId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Tagged message type, as seen on the wire by adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Progress,
    Chunk,
    ToolCall,
    ToolResult,
    Success,
    Failure,
    Heartbeat,
    Cancelled,
}

impl MessageKind {
    /// Terminal kinds end a job's stream; exactly one is delivered per job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Chunk => "chunk",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Heartbeat => "heartbeat",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Envelope routed through the hub to subscribers.
///
/// `sequence` increases monotonically per job (heartbeats count per
/// subscriber instead); receivers may use gaps as an eviction signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub routing_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Message {
    fn for_job(kind: MessageKind, job: &Job, sequence: u64, payload: serde_json::Value) -> Self {
        Self {
            kind,
            routing_key: job.routing_key.clone(),
            job_id: Some(job.id),
            sequence,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Incremental progress: `step` of `total`, with a free-form note.
    pub fn progress(job: &Job, sequence: u64, step: u32, total: u32, note: impl Into<String>) -> Self {
        Self::for_job(
            MessageKind::Progress,
            job,
            sequence,
            json!({"step": step, "total": total, "note": note.into()}),
        )
    }

    /// A streamed output fragment (e.g. a text delta).
    pub fn chunk(job: &Job, sequence: u64, delta: impl Into<String>) -> Self {
        Self::for_job(MessageKind::Chunk, job, sequence, json!({"delta": delta.into()}))
    }

    /// The executor invoked a tool.
    pub fn tool_call(job: &Job, sequence: u64, name: &str, arguments: serde_json::Value) -> Self {
        Self::for_job(
            MessageKind::ToolCall,
            job,
            sequence,
            json!({"name": name, "arguments": arguments}),
        )
    }

    /// A tool produced a result.
    pub fn tool_result(job: &Job, sequence: u64, name: &str, result: serde_json::Value) -> Self {
        Self::for_job(
            MessageKind::ToolResult,
            job,
            sequence,
            json!({"name": name, "result": result}),
        )
    }

    /// Terminal: the job completed.
    pub fn success(job: &Job, sequence: u64, payload: serde_json::Value) -> Self {
        Self::for_job(MessageKind::Success, job, sequence, payload)
    }

    /// Terminal: the job failed with a tagged error.
    pub fn failure(job: &Job, sequence: u64, error: &DispatchError) -> Self {
        Self::for_job(
            MessageKind::Failure,
            job,
            sequence,
            json!({"kind": error.kind(), "detail": error.to_string()}),
        )
    }

    /// Terminal: the scope was cancelled while the job was in flight.
    pub fn cancelled(job: &Job, sequence: u64) -> Self {
        Self::for_job(
            MessageKind::Cancelled,
            job,
            sequence,
            json!({"detail": "cancelled before completion"}),
        )
    }

    /// Per-subscriber liveness ping emitted by the session writer.
    pub fn heartbeat(routing_key: impl Into<String>, sequence: u64) -> Self {
        Self {
            kind: MessageKind::Heartbeat,
            routing_key: routing_key.into(),
            job_id: None,
            sequence,
            timestamp: Utc::now(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// Terminal result returned by an executor.
///
/// `Done` is for executors that stream everything they have to say and have
/// no final payload; it is delivered as a `success` envelope with a null
/// payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(serde_json::Value),
    Done,
}

impl Outcome {
    pub fn into_payload(self) -> serde_json::Value {
        match self {
            Self::Success(payload) => payload,
            Self::Done => serde_json::Value::Null,
        }
    }
}
