//! Fabric configuration
//!
//! This module provides `FabricConfig` for sizing the dispatcher pool, the
//! job queue, the admission rate, and the subscriber-facing hub.

use std::time::Duration;

/// Configuration for the dispatch fabric
#[derive(Debug, Clone)]
pub struct FabricConfig {
    /// Number of long-lived worker tasks in the dispatcher pool
    pub worker_count: usize,

    /// Job-queue buffer size (default: 2 × worker_count)
    pub queue_capacity: usize,

    /// Admission rate in executions per second
    pub rate_per_second: f64,

    /// Token bucket capacity (default: ⌈rate⌉ + 1)
    pub rate_burst: usize,

    /// Maximum retries per job after the first execution
    pub max_retries: u32,

    /// Base delay before a retried job is re-enqueued (doubles per attempt)
    pub retry_base_delay: Duration,

    /// Cap on the retry delay
    pub retry_max_delay: Duration,

    /// Per-job execution deadline (overridable per job)
    pub job_timeout: Duration,

    /// Per-subscriber outbound buffer capacity
    pub subscriber_buffer: usize,

    /// Subscriber ping cadence (default: 9/10 of the read deadline)
    pub heartbeat_interval: Duration,

    /// Subscriber liveness window
    pub read_deadline: Duration,

    /// Cap on inbound subscriber frames
    pub max_message_bytes: usize,
}

impl FabricConfig {
    /// Create a configuration with the documented defaults.
    pub fn new() -> Self {
        let worker_count = 5;
        let rate_per_second = 2.0;
        let read_deadline = Duration::from_secs(60);
        Self {
            worker_count,
            queue_capacity: worker_count * 2,
            rate_per_second,
            rate_burst: Self::derive_burst(rate_per_second),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            job_timeout: Duration::from_secs(30),
            subscriber_buffer: 256,
            heartbeat_interval: Self::derive_heartbeat(read_deadline),
            read_deadline,
            max_message_bytes: 512 * 1024,
        }
    }

    /// Set the worker pool size. Also re-derives `queue_capacity`; call
    /// `with_queue_capacity` afterwards to override.
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self.queue_capacity = self.worker_count * 2;
        self
    }

    /// Set the job-queue buffer size.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the admission rate. Non-positive rates are coerced to 1.0.
    /// Also re-derives `rate_burst`; call `with_rate_burst` afterwards to override.
    pub fn with_rate_per_second(mut self, rate: f64) -> Self {
        self.rate_per_second = if rate > 0.0 { rate } else { 1.0 };
        self.rate_burst = Self::derive_burst(self.rate_per_second);
        self
    }

    /// Set the token bucket capacity.
    pub fn with_rate_burst(mut self, burst: usize) -> Self {
        self.rate_burst = burst.max(1);
        self
    }

    /// Set the retry ceiling (retries after the first execution).
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base retry delay (doubles per attempt, jittered).
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Set the cap on the retry delay.
    pub fn with_retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = delay;
        self
    }

    /// Set the default per-job deadline.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Set the per-subscriber outbound buffer capacity.
    pub fn with_subscriber_buffer(mut self, capacity: usize) -> Self {
        self.subscriber_buffer = capacity.max(1);
        self
    }

    /// Set the subscriber liveness window. Also re-derives the heartbeat
    /// cadence to 9/10 of the deadline; call `with_heartbeat_interval`
    /// afterwards to override.
    pub fn with_read_deadline(mut self, deadline: Duration) -> Self {
        self.read_deadline = deadline;
        self.heartbeat_interval = Self::derive_heartbeat(deadline);
        self
    }

    /// Set the subscriber ping cadence.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the cap on inbound subscriber frames.
    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes.max(1);
        self
    }

    fn derive_burst(rate: f64) -> usize {
        rate.ceil() as usize + 1
    }

    fn derive_heartbeat(read_deadline: Duration) -> Duration {
        read_deadline.mul_f64(0.9)
    }
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self::new()
    }
}
