//! Dispatch Fabric - Request-Dispatch and Streaming Library
//!
//! A reusable concurrency core for services that accept units of work,
//! execute them on a bounded worker pool, and stream incremental results to
//! subscribers:
//! - Bounded job queue with producer backpressure
//! - Fixed worker pool with per-job timeouts and panic isolation
//! - Token-bucket admission with a configurable burst
//! - Automatic retry with exponential backoff and jitter
//! - Routing-key broadcast hub with slow-consumer eviction
//! - Subscriber sessions with heartbeats and read-deadline liveness
//! - One hierarchical cancellation scope for deterministic shutdown
//!
//! # Architecture
//!
//! ```text
//! Producers
//!   ↓ submit (bounded, QueueFull backpressure)
//! JobQueue
//!   ↓ receive                       ↖ retry (backoff + jitter)
//! Dispatcher workers (N)
//!   ↓ acquire (token bucket)
//! Executor (user-supplied)
//!   ↓ progress / chunks / terminal
//! Hub ──routing key──► subscriber buffers ──► sessions / adapters
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use dispatch_fabric::{DispatchFabric, Executor, FabricConfig, Job, Outcome, ProgressSink, Scope};
//!
//! // 1. Define your executor
//! struct MyExecutor;
//!
//! #[async_trait::async_trait]
//! impl Executor for MyExecutor {
//!     async fn execute(
//!         &self,
//!         scope: &Scope,
//!         job: &Job,
//!         sink: &ProgressSink,
//!     ) -> Result<Outcome, DispatchError> {
//!         sink.chunk("working...");
//!         Ok(Outcome::Success(serde_json::json!({"done": true})))
//!     }
//!
//!     fn name(&self) -> &'static str { "my_executor" }
//! }
//!
//! // 2. Start the fabric and wire a subscriber
//! let fabric = DispatchFabric::new(FabricConfig::new(), Arc::new(MyExecutor))?;
//! let mut sub = fabric.subscribe("conversation-1");
//!
//! // 3. Submit work and stream results
//! fabric.submit(Job::new("conversation-1", serde_json::json!({"q": "hi"})))?;
//! while let Some(message) = sub.recv().await {
//!     println!("{message:?}");
//! }
//!
//! // 4. Shut down deterministically
//! fabric.wait().await;
//! ```

mod config;
mod dispatcher;
mod error;
mod executor;
mod fabric;
mod hub;
mod job;
mod limiter;
mod message;
pub mod metrics;
mod queue;
mod scope;
mod session;
mod stats;

// Re-export all public types
pub use config::FabricConfig;
pub use error::{DispatchError, ErrorKind, RetryBackoff};
pub use executor::{Executor, ProgressSink};
pub use fabric::DispatchFabric;
pub use hub::{Hub, InboundFrame, SubscriberId, Subscription};
pub use job::{Job, JobId};
pub use limiter::RateLimiter;
pub use message::{Message, MessageKind, Outcome};
pub use queue::JobQueue;
pub use scope::Scope;
pub use session::{SessionConfig, SessionTransport, SubscriberSession};
pub use stats::{DispatchStats, StatsSnapshot};

/// Result type alias for fabric operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
