//! Metrics module for fabric observability.
//!
//! Facade-only: the helpers here record through the `metrics` crate; the
//! Prometheus recorder itself is installed by the embedder (see the
//! `observability` crate).
//!
//! ## Available Metrics
//!
//! - `dispatch_jobs_processed_total` - Counter of jobs by terminal status
//! - `dispatch_job_duration_seconds` - Histogram of execution time
//! - `dispatch_queue_depth` - Gauge of jobs waiting in the queue
//! - `dispatch_queue_rejections_total` - Counter of QueueFull rejections
//! - `dispatch_in_flight_jobs` - Gauge of jobs currently executing
//! - `dispatch_retries_total` - Counter of retry attempts
//! - `dispatch_messages_published_total` - Counter of hub fan-outs by kind
//! - `dispatch_subscribers_evicted_total` - Counter of slow-consumer evictions
//! - `dispatch_subscribers_total` - Gauge of registered subscribers

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metric names as constants for consistency
pub mod names {
    pub const JOBS_PROCESSED: &str = "dispatch_jobs_processed_total";
    pub const JOB_DURATION: &str = "dispatch_job_duration_seconds";
    pub const QUEUE_DEPTH: &str = "dispatch_queue_depth";
    pub const QUEUE_REJECTIONS: &str = "dispatch_queue_rejections_total";
    pub const IN_FLIGHT_JOBS: &str = "dispatch_in_flight_jobs";
    pub const RETRIES: &str = "dispatch_retries_total";
    pub const MESSAGES_PUBLISHED: &str = "dispatch_messages_published_total";
    pub const SUBSCRIBERS_EVICTED: &str = "dispatch_subscribers_evicted_total";
    pub const SUBSCRIBERS_TOTAL: &str = "dispatch_subscribers_total";
}

/// Terminal status for metrics labeling
#[derive(Debug, Clone, Copy)]
pub enum JobStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Record a job reaching a terminal status.
pub fn record_job_processed(executor: &str, status: JobStatus) {
    counter!(
        names::JOBS_PROCESSED,
        "executor" => executor.to_string(),
        "status" => status.as_str().to_string()
    )
    .increment(1);
}

/// Record job execution duration.
pub fn record_job_duration(executor: &str, duration: Duration) {
    histogram!(
        names::JOB_DURATION,
        "executor" => executor.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Update the queue depth gauge.
pub fn set_queue_depth(depth: usize) {
    gauge!(names::QUEUE_DEPTH).set(depth as f64);
}

/// Record a non-blocking submission rejected with QueueFull.
pub fn record_queue_rejection() {
    counter!(names::QUEUE_REJECTIONS).increment(1);
}

/// Update the in-flight jobs gauge.
pub fn set_in_flight_jobs(count: usize) {
    gauge!(names::IN_FLIGHT_JOBS).set(count as f64);
}

/// Record a retry being scheduled.
pub fn record_retry(executor: &str, attempt: u32) {
    counter!(
        names::RETRIES,
        "executor" => executor.to_string(),
        "attempt" => attempt.to_string()
    )
    .increment(1);
}

/// Record a message fanned out through the hub.
pub fn record_published(kind: &'static str, delivered: usize) {
    counter!(
        names::MESSAGES_PUBLISHED,
        "kind" => kind
    )
    .increment(delivered as u64);
}

/// Record a slow consumer being evicted.
pub fn record_eviction() {
    counter!(names::SUBSCRIBERS_EVICTED).increment(1);
}

/// Update the registered subscribers gauge.
pub fn set_subscribers_total(count: usize) {
    gauge!(names::SUBSCRIBERS_TOTAL).set(count as f64);
}
