//! Dispatch Demo Service
//!
//! A self-contained binary that embeds the dispatch fabric end to end:
//!
//! ```text
//! generated jobs (round-robin over sessions)
//!   ↓ submit (bounded queue)
//! DispatchFabric workers
//!   ↓ StreamingEchoExecutor (chunks + progress + success)
//! Hub
//!   ↓ routing key (session id)
//! logging subscribers
//! ```
//!
//! Configuration comes from environment variables; shutdown is
//! signal-driven (SIGINT/SIGTERM) with a clean drain when the generated
//! workload finishes first.

use async_trait::async_trait;
use core_config::{app_info, env_parse_or, ConfigError, Environment, FromEnv};
use dispatch_fabric::{
    DispatchError, DispatchFabric, Executor, FabricConfig, Job, Outcome, ProgressSink, Scope,
};
use eyre::{Result, WrapErr};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

/// Demo workload knobs, loaded from the environment.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Jobs to generate.
    pub job_count: usize,
    /// Distinct routing keys (simulated sessions) to spread jobs across.
    pub session_count: usize,
    /// Dispatcher pool size.
    pub worker_count: usize,
    /// Admission rate.
    pub rate_per_second: f64,
    /// Retry ceiling.
    pub max_retries: u32,
}

impl FromEnv for DemoConfig {
    /// Reads from environment variables with sensible defaults:
    /// - DEMO_JOB_COUNT: defaults to 12
    /// - DEMO_SESSION_COUNT: defaults to 3
    /// - WORKER_COUNT: defaults to 5
    /// - RATE_PER_SECOND: defaults to 10.0
    /// - MAX_RETRIES: defaults to 3
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            job_count: env_parse_or("DEMO_JOB_COUNT", 12)?,
            session_count: env_parse_or("DEMO_SESSION_COUNT", 3)?.max(1),
            worker_count: env_parse_or("WORKER_COUNT", 5)?,
            rate_per_second: env_parse_or("RATE_PER_SECOND", 10.0)?,
            max_retries: env_parse_or("MAX_RETRIES", 3)?,
        })
    }
}

/// Executor that streams a few chunks and progress updates, then echoes the
/// job payload back.
struct StreamingEchoExecutor;

#[async_trait]
impl Executor for StreamingEchoExecutor {
    async fn execute(
        &self,
        scope: &Scope,
        job: &Job,
        sink: &ProgressSink,
    ) -> Result<Outcome, DispatchError> {
        let steps = 3u32;
        for step in 1..=steps {
            // Simulated work; bail out promptly if the fabric is stopping.
            tokio::select! {
                biased;
                _ = scope.cancelled() => return Err(DispatchError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(40)) => {}
            }
            sink.progress(step, steps, "thinking");
            sink.chunk(format!("chunk {step}/{steps} for job {} ", job.id));
        }

        Ok(Outcome::Success(json!({"echo": job.payload})))
    }

    fn name(&self) -> &'static str {
        "streaming_echo"
    }
}

/// Run the demo.
///
/// This is the main entry point for the binary. It:
/// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
/// 2. Installs the Prometheus metrics recorder
/// 3. Starts the fabric and one logging subscriber per session
/// 4. Generates jobs round-robin over the sessions
/// 5. Drains cleanly when the workload finishes, or stops on SIGINT/SIGTERM
///
/// # Errors
///
/// Returns an error if:
/// - An environment variable is set but malformed
/// - The fabric configuration is rejected at startup
pub async fn run() -> Result<()> {
    // Initialize tracing (env-aware: JSON for prod, pretty for dev)
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    // Initialize Prometheus metrics
    observability::init_metrics();

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting dispatch demo");
    info!("Environment: {:?}", environment);

    let demo = DemoConfig::from_env().wrap_err("Failed to load demo configuration")?;
    info!(
        job_count = demo.job_count,
        session_count = demo.session_count,
        worker_count = demo.worker_count,
        rate_per_second = demo.rate_per_second,
        "Demo configuration loaded"
    );

    let fabric_config = FabricConfig::new()
        .with_worker_count(demo.worker_count)
        .with_rate_per_second(demo.rate_per_second)
        .with_max_retries(demo.max_retries);

    let fabric = DispatchFabric::new(fabric_config, Arc::new(StreamingEchoExecutor))
        .wrap_err("Failed to start the dispatch fabric")?;

    // One logging subscriber per session, registered before any job runs.
    for session in 0..demo.session_count {
        let key = session_key(session);
        let mut sub = fabric.subscribe(key.clone());
        tokio::spawn(async move {
            while let Some(message) = sub.recv().await {
                info!(
                    routing_key = %key,
                    kind = message.kind.as_str(),
                    sequence = message.sequence,
                    payload = %message.payload,
                    "observed message"
                );
            }
            info!(routing_key = %key, "subscriber stream ended");
        });
    }

    for n in 0..demo.job_count {
        let key = session_key(n % demo.session_count);
        let job = Job::new(key, json!({"n": n}));
        if let Err(e) = fabric.submit_blocking(job).await {
            error!(error = %e, "Failed to submit job");
            break;
        }
    }

    // Drain when the workload completes; stop early on a signal.
    let target = fabric.stats().submitted;
    let finished = tokio::select! {
        _ = shutdown_signal() => false,
        _ = async {
            loop {
                if fabric.stats().completed >= target {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        } => true,
    };

    let snapshot = if finished {
        info!("Workload complete, draining");
        fabric.wait().await
    } else {
        info!("Signal received, stopping");
        fabric.stop().await
    };

    info!(
        submitted = snapshot.submitted,
        succeeded = snapshot.succeeded,
        failed = snapshot.failed,
        retries = snapshot.retries,
        "Dispatch demo finished"
    );

    Ok(())
}

fn session_key(session: usize) -> String {
    format!("session-{session}")
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
