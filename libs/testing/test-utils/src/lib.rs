//! Shared test utilities for fabric testing
//!
//! This crate provides reusable test infrastructure for crates embedding the
//! dispatch fabric:
//! - `ScriptedExecutor`: per-routing-key attempt scripts with progress,
//!   chunks, delays, failures, and panics
//! - `ChannelTransport`: in-memory `SessionTransport` with probes for both
//!   directions
//! - `stream` helpers: draining subscriptions with deadlines
//!
//! # Usage
//!
//! ```rust,ignore
//! use test_utils::{AttemptPlan, ScriptedExecutor, stream::collect_until_terminal};
//!
//! let executor = ScriptedExecutor::new()
//!     .with_script("conv-1", vec![
//!         AttemptPlan::transient("flaky network"),
//!         AttemptPlan::success(serde_json::json!({"ok": true})),
//!     ]);
//!
//! let fabric = DispatchFabric::new(config, executor.clone())?;
//! let mut sub = fabric.subscribe("conv-1");
//! fabric.submit(Job::new("conv-1", serde_json::json!(null)))?;
//!
//! let messages = collect_until_terminal(&mut sub, Duration::from_secs(5)).await;
//! ```

mod executor;
pub mod stream;
mod transport;

pub use executor::{AttemptPlan, AttemptRecord, PlannedResult, ScriptedExecutor};
pub use transport::{ChannelTransport, TransportProbe};

/// Initialize pretty tracing for a test binary. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
