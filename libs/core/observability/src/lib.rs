//! Observability utilities for the dispatch fabric.
//!
//! This crate provides:
//! - Prometheus metrics recording and export
//! - Metric descriptions for dispatcher, queue, and hub instrumentation
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, render_metrics};
//!
//! // Initialize metrics recorder once at startup
//! init_metrics();
//!
//! // Render Prometheus text format wherever the embedder exposes it
//! let body = render_metrics();
//! ```

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup.
/// Returns the PrometheusHandle for rendering metrics.
pub fn init_metrics() -> &'static PrometheusHandle {
    METRICS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        info!("Prometheus metrics recorder initialized");

        // Register metric descriptions
        register_metric_descriptions();

        handle
    })
}

/// Get the metrics handle (must call init_metrics first)
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Render current metrics in Prometheus text format.
///
/// The fabric exposes a library API, so serving this string over a
/// transport is left to the embedder.
pub fn render_metrics() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

/// Register metric descriptions for documentation
fn register_metric_descriptions() {
    use metrics::describe_counter;
    use metrics::describe_gauge;
    use metrics::describe_histogram;

    // Dispatcher metrics
    describe_counter!(
        "dispatch_jobs_processed_total",
        "Total jobs processed by terminal status"
    );
    describe_histogram!(
        "dispatch_job_duration_seconds",
        "Job execution duration in seconds"
    );
    describe_counter!(
        "dispatch_retries_total",
        "Total retry attempts scheduled by the dispatcher"
    );
    describe_gauge!(
        "dispatch_in_flight_jobs",
        "Jobs currently being executed by workers"
    );

    // Queue metrics
    describe_gauge!(
        "dispatch_queue_depth",
        "Jobs waiting in the bounded queue"
    );
    describe_counter!(
        "dispatch_queue_rejections_total",
        "Non-blocking submissions rejected because the queue was full"
    );

    // Hub metrics
    describe_counter!(
        "dispatch_messages_published_total",
        "Messages fanned out to subscribers by kind"
    );
    describe_counter!(
        "dispatch_subscribers_evicted_total",
        "Subscribers evicted for not draining their buffers"
    );
    describe_gauge!(
        "dispatch_subscribers_total",
        "Subscribers currently registered on the hub"
    );
}
