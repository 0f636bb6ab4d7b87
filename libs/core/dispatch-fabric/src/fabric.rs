//! Composition root tying the scope, queue, limiter, hub, and dispatcher
//! together.
//!
//! Everything is injected and owned here; there is no process-wide state,
//! so independent fabrics can run side by side (parallel tests included).

use crate::config::FabricConfig;
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::executor::Executor;
use crate::hub::{Hub, Subscription};
use crate::job::Job;
use crate::limiter::RateLimiter;
use crate::queue::JobQueue;
use crate::scope::Scope;
use crate::session::{SessionConfig, SessionTransport, SubscriberSession};
use crate::stats::{DispatchStats, StatsSnapshot};
use std::sync::Arc;
use tracing::info;

/// The assembled request-dispatch and streaming fabric.
///
/// Termination consumes the fabric: exactly one of [`DispatchFabric::wait`]
/// (drain) or [`DispatchFabric::stop`] (cancel) can be called, and ownership
/// rules out a second.
#[derive(Debug)]
pub struct DispatchFabric {
    config: FabricConfig,
    scope: Scope,
    queue: Arc<JobQueue>,
    limiter: Arc<RateLimiter>,
    hub: Arc<Hub>,
    stats: Arc<DispatchStats>,
    dispatcher: Dispatcher,
}

impl DispatchFabric {
    /// Build and start a fabric under a fresh root scope.
    pub fn new(config: FabricConfig, executor: Arc<dyn Executor>) -> Result<Self, DispatchError> {
        Self::with_parent(config, executor, &Scope::new())
    }

    /// Build and start a fabric whose scope is a child of `parent`, so
    /// cancelling the parent tears the fabric down too.
    pub fn with_parent(
        config: FabricConfig,
        executor: Arc<dyn Executor>,
        parent: &Scope,
    ) -> Result<Self, DispatchError> {
        validate(&config)?;

        let scope = parent.child();
        let queue = Arc::new(JobQueue::new(config.queue_capacity));
        let limiter = Arc::new(RateLimiter::new(
            config.rate_per_second,
            config.rate_burst,
            &scope,
        ));
        let hub = Hub::new(&scope, config.subscriber_buffer);
        let stats = Arc::new(DispatchStats::new());
        let dispatcher = Dispatcher::start(
            config.clone(),
            scope.clone(),
            queue.clone(),
            limiter.clone(),
            hub.clone(),
            stats.clone(),
            executor,
        );

        info!(
            worker_count = config.worker_count,
            queue_capacity = config.queue_capacity,
            rate_per_second = config.rate_per_second,
            "dispatch fabric started"
        );

        Ok(Self {
            config,
            scope,
            queue,
            limiter,
            hub,
            stats,
            dispatcher,
        })
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    /// A handle to the fabric's scope; cancelling it initiates shutdown,
    /// after which `stop` (or `wait`) collects the pieces.
    pub fn scope(&self) -> Scope {
        self.scope.clone()
    }

    /// The broadcast hub, for adapters that publish or inspect directly.
    pub fn hub(&self) -> Arc<Hub> {
        self.hub.clone()
    }

    /// Point-in-time dispatcher counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Jobs currently buffered in the queue.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Non-blocking submit; `QueueFull` is backpressure the producer reacts to.
    pub fn submit(&self, job: Job) -> Result<(), DispatchError> {
        self.queue.submit(job)?;
        self.stats.record_submitted();
        Ok(())
    }

    /// Submit, waiting for queue capacity (or cancellation).
    pub async fn submit_blocking(&self, job: Job) -> Result<(), DispatchError> {
        self.queue.submit_blocking(&self.scope, job).await?;
        self.stats.record_submitted();
        Ok(())
    }

    /// Register an in-process subscriber for a routing key.
    pub fn subscribe(&self, routing_key: impl Into<String>) -> Subscription {
        self.hub.subscribe(routing_key)
    }

    /// Register a transport-backed subscriber: one hub registration plus the
    /// reader/writer session pumping it.
    pub fn subscribe_session(
        &self,
        routing_key: impl Into<String>,
        transport: Arc<dyn SessionTransport>,
    ) -> SubscriberSession {
        SubscriberSession::spawn(
            self.hub.clone(),
            &self.scope,
            routing_key,
            transport,
            SessionConfig::from_fabric(&self.config),
        )
    }

    /// Drain shutdown: stop accepting jobs, let workers finish what is
    /// queued, then tear everything down. Returns the final counters.
    pub async fn wait(self) -> StatsSnapshot {
        self.dispatcher.wait().await;
        self.limiter.stop();
        self.hub.shutdown();
        self.scope.cancel();
        info!("dispatch fabric drained");
        self.stats.snapshot()
    }

    /// Cancel shutdown: interrupt in-flight work, finalize queued jobs with
    /// cancelled terminals, then tear everything down.
    pub async fn stop(self) -> StatsSnapshot {
        self.scope.cancel();
        self.dispatcher.stop().await;
        self.limiter.stop();
        self.hub.shutdown();
        info!("dispatch fabric stopped");
        self.stats.snapshot()
    }
}

fn validate(config: &FabricConfig) -> Result<(), DispatchError> {
    if config.job_timeout.is_zero() {
        return Err(DispatchError::Config("job_timeout must be positive".into()));
    }
    if config.heartbeat_interval >= config.read_deadline {
        return Err(DispatchError::Config(format!(
            "heartbeat_interval ({:?}) must be shorter than read_deadline ({:?})",
            config.heartbeat_interval, config.read_deadline
        )));
    }
    Ok(())
}
