//! Worker pool dispatching queued jobs to the executor.
//!
//! Each worker is a long-lived task looping dequeue → rate-limit → execute
//! → publish, until the scope is cancelled or the queue is closed and
//! drained. Retriable failures re-enqueue a fresh job value after a
//! jittered backoff; executor panics are caught at the worker boundary and
//! become internal failures, never worker deaths.

use crate::config::FabricConfig;
use crate::error::{DispatchError, RetryBackoff};
use crate::executor::{Executor, ProgressSink};
use crate::hub::Hub;
use crate::job::Job;
use crate::limiter::RateLimiter;
use crate::message::Message;
use crate::metrics::{self, JobStatus};
use crate::queue::JobQueue;
use crate::scope::Scope;
use crate::stats::DispatchStats;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Everything a worker (or a retry task) needs, cheaply clonable.
#[derive(Clone)]
struct WorkerContext {
    scope: Scope,
    queue: Arc<JobQueue>,
    limiter: Arc<RateLimiter>,
    hub: Arc<Hub>,
    stats: Arc<DispatchStats>,
    executor: Arc<dyn Executor>,
    config: FabricConfig,
    tracker: TaskTracker,
}

/// Fixed pool of worker tasks over the shared job queue.
#[derive(Debug)]
pub struct Dispatcher {
    scope: Scope,
    queue: Arc<JobQueue>,
    hub: Arc<Hub>,
    stats: Arc<DispatchStats>,
    tracker: TaskTracker,
}

impl Dispatcher {
    /// Spawn the worker pool. Workers run until termination via
    /// [`Dispatcher::wait`] or [`Dispatcher::stop`].
    pub fn start(
        config: FabricConfig,
        scope: Scope,
        queue: Arc<JobQueue>,
        limiter: Arc<RateLimiter>,
        hub: Arc<Hub>,
        stats: Arc<DispatchStats>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let tracker = TaskTracker::new();
        let ctx = WorkerContext {
            scope: scope.clone(),
            queue: queue.clone(),
            limiter,
            hub: hub.clone(),
            stats: stats.clone(),
            executor,
            config: config.clone(),
            tracker: tracker.clone(),
        };

        for worker_id in 0..config.worker_count {
            let ctx = ctx.clone();
            tracker.spawn(worker_loop(worker_id, ctx));
        }
        info!(
            worker_count = config.worker_count,
            executor = ctx.executor.name(),
            "dispatcher started"
        );

        Self {
            scope,
            queue,
            hub,
            stats,
            tracker,
        }
    }

    /// Close the input queue, let workers drain it, and return once every
    /// worker (and pending retry task) has exited.
    pub async fn wait(&self) {
        self.queue.close();
        self.tracker.close();
        self.tracker.wait().await;
        self.finalize_leftovers().await;
        info!("dispatcher drained");
    }

    /// Cancel the scope and wait for workers to exit, finalizing any jobs
    /// still queued with a cancelled terminal.
    pub async fn stop(&self) {
        self.scope.cancel();
        self.queue.close();
        self.tracker.close();
        self.tracker.wait().await;
        self.finalize_leftovers().await;
        info!("dispatcher stopped");
    }

    /// Jobs accepted but never dequeued still owe their subscribers a
    /// terminal message.
    async fn finalize_leftovers(&self) {
        for job in self.queue.drain().await {
            let sink = ProgressSink::new(self.hub.clone(), &job);
            let seq = sink.next_sequence();
            self.hub.publish(Message::cancelled(&job, seq));
            self.stats.record_discarded();
            debug!(job_id = %job.id, "queued job cancelled at shutdown");
        }
    }
}

async fn worker_loop(worker_id: usize, ctx: WorkerContext) {
    debug!(worker_id, "worker started");

    loop {
        // Idle: wait for work, the queue closing, or cancellation.
        let job = match ctx.queue.receive(&ctx.scope).await {
            Err(_) => break,
            Ok(None) => {
                debug!(worker_id, "queue closed and drained");
                break;
            }
            Ok(Some(job)) => job,
        };

        ctx.stats.record_started();
        metrics::set_in_flight_jobs(ctx.stats.snapshot().in_progress as usize);

        // RateLimited: admission before execution. A cancellation here
        // still owes the dequeued job its terminal.
        if ctx.limiter.acquire(&ctx.scope).await.is_err() {
            finalize_cancelled(&ctx, &job);
            break;
        }

        // Executing.
        let worker_cancelled = execute_job(&ctx, job).await;
        metrics::set_in_flight_jobs(ctx.stats.snapshot().in_progress as usize);
        if worker_cancelled {
            break;
        }
    }

    debug!(worker_id, "worker exited");
}

/// Publish the cancelled terminal for a job this worker owns.
fn finalize_cancelled(ctx: &WorkerContext, job: &Job) {
    let sink = ProgressSink::new(ctx.hub.clone(), job);
    let seq = sink.next_sequence();
    ctx.hub.publish(Message::cancelled(job, seq));
    ctx.stats.record_failure();
    metrics::record_job_processed(ctx.executor.name(), JobStatus::Cancelled);
    debug!(job_id = %job.id, "job cancelled");
}

/// Run one job to its terminal (or its retry hand-off).
///
/// Returns true when the worker itself should exit because the fabric scope
/// was cancelled mid-flight.
async fn execute_job(ctx: &WorkerContext, job: Job) -> bool {
    let sink = ProgressSink::new(ctx.hub.clone(), &job);
    let timeout = job.timeout.unwrap_or(ctx.config.job_timeout);
    let exec_scope = ctx.scope.with_timeout(timeout);
    let started = Instant::now();

    debug!(
        job_id = %job.id,
        routing_key = %job.routing_key,
        retry_count = job.retry_count,
        "executing job"
    );

    let outcome = {
        // Catch panics at the worker boundary: a buggy executor fails its
        // job, not the pool.
        let fut = AssertUnwindSafe(ctx.executor.execute(&exec_scope, &job, &sink)).catch_unwind();
        tokio::select! {
            biased;
            _ = exec_scope.cancelled() => {
                if ctx.scope.is_cancelled() {
                    Err(DispatchError::Cancelled)
                } else {
                    Err(DispatchError::Timeout(timeout))
                }
            }
            res = fut => match res {
                Ok(result) => result,
                Err(panic) => Err(DispatchError::Internal(panic_message(&panic))),
            },
        }
    };
    // Reap the deadline timer for executions that finish early.
    exec_scope.cancel();
    metrics::record_job_duration(ctx.executor.name(), started.elapsed());

    match outcome {
        Ok(outcome) => {
            let seq = sink.next_sequence();
            ctx.hub
                .publish(Message::success(&job, seq, outcome.into_payload()));
            ctx.stats.record_success();
            metrics::record_job_processed(ctx.executor.name(), JobStatus::Succeeded);
            debug!(job_id = %job.id, "job succeeded");
            false
        }
        Err(DispatchError::Cancelled) => {
            let seq = sink.next_sequence();
            ctx.hub.publish(Message::cancelled(&job, seq));
            ctx.stats.record_failure();
            metrics::record_job_processed(ctx.executor.name(), JobStatus::Cancelled);
            debug!(job_id = %job.id, "job cancelled");
            true
        }
        Err(err) if err.is_retriable() && !job.exceeded_max_retries(ctx.config.max_retries) => {
            schedule_retry(ctx, &sink, job, err);
            false
        }
        Err(err) => {
            let seq = sink.next_sequence();
            ctx.hub.publish(Message::failure(&job, seq, &err));
            ctx.stats.record_failure();
            metrics::record_job_processed(ctx.executor.name(), JobStatus::Failed);
            if matches!(err, DispatchError::Internal(_)) {
                error!(job_id = %job.id, error = %err, "executor crashed");
            } else {
                warn!(
                    job_id = %job.id,
                    retry_count = job.retry_count,
                    error = %err,
                    "job failed"
                );
            }
            false
        }
    }
}

/// Hand a failed job back to the queue after a jittered backoff.
///
/// The delay runs on a detached scope-bound task so the worker moves on
/// immediately. If the re-enqueue cannot happen (scope cancelled, queue
/// closed), the task publishes the job's terminal itself so exactly one is
/// always delivered.
fn schedule_retry(ctx: &WorkerContext, sink: &ProgressSink, job: Job, err: DispatchError) {
    let mut next = job.with_retry();
    let attempts_allowed = ctx.config.max_retries + 1;

    let backoff = RetryBackoff::new(ctx.config.retry_base_delay, ctx.config.retry_max_delay);
    let delay = backoff.delay_for_attempt(job.retry_count);

    ctx.stats.record_retry();
    metrics::record_retry(ctx.executor.name(), next.retry_count);

    let seq = sink.next_sequence();
    ctx.hub.publish(Message::progress(
        &job,
        seq,
        next.retry_count,
        attempts_allowed,
        format!(
            "retrying: attempt {}/{}",
            next.retry_count + 1,
            attempts_allowed
        ),
    ));
    warn!(
        job_id = %job.id,
        retry = next.retry_count,
        delay_ms = delay.as_millis() as u64,
        error = %err,
        "scheduling retry"
    );

    // Numbering continues where this attempt stopped.
    next.sequence_base = sink.peek_sequence();

    let ctx = ctx.clone();
    ctx.tracker.clone().spawn(async move {
        let slept = tokio::select! {
            biased;
            _ = ctx.scope.cancelled() => Err(DispatchError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        };
        let requeued = match slept {
            Ok(()) => ctx.queue.submit_blocking(&ctx.scope, next.clone()).await,
            Err(e) => Err(e),
        };

        match requeued {
            Ok(()) => {}
            Err(DispatchError::Cancelled) => {
                let sink = ProgressSink::new(ctx.hub.clone(), &next);
                let seq = sink.next_sequence();
                ctx.hub.publish(Message::cancelled(&next, seq));
                ctx.stats.record_discarded();
                metrics::record_job_processed(ctx.executor.name(), JobStatus::Cancelled);
            }
            Err(_) => {
                // Queue closed under us: finalize with the failure that
                // triggered the retry.
                let sink = ProgressSink::new(ctx.hub.clone(), &next);
                let seq = sink.next_sequence();
                ctx.hub.publish(Message::failure(&next, seq, &err));
                ctx.stats.record_discarded();
                metrics::record_job_processed(ctx.executor.name(), JobStatus::Failed);
                warn!(job_id = %next.id, error = %err, "retry dropped, queue closed");
            }
        }
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "executor panicked".to_string()
    }
}
