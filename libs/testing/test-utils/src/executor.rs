//! Scripted executor for driving the dispatcher in tests.

use async_trait::async_trait;
use dispatch_fabric::{DispatchError, Executor, Job, Outcome, ProgressSink, Scope};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// What one execution attempt should do.
#[derive(Debug, Clone)]
pub struct AttemptPlan {
    /// Progress messages to emit, as (step, total, note).
    pub progress: Vec<(u32, u32, String)>,
    /// Chunk deltas to emit after the progress messages.
    pub chunks: Vec<String>,
    /// Optional busy time before finishing; cancellation is honored during it.
    pub delay: Option<Duration>,
    /// How the attempt ends.
    pub result: PlannedResult,
}

/// Planned ending of an attempt.
#[derive(Debug, Clone)]
pub enum PlannedResult {
    Success(serde_json::Value),
    Done,
    Fail(DispatchError),
    Panic(String),
}

impl AttemptPlan {
    pub fn success(payload: serde_json::Value) -> Self {
        Self::ending(PlannedResult::Success(payload))
    }

    pub fn done() -> Self {
        Self::ending(PlannedResult::Done)
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::ending(PlannedResult::Fail(DispatchError::Transient(detail.into())))
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self::ending(PlannedResult::Fail(DispatchError::Permanent(detail.into())))
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self::ending(PlannedResult::Panic(message.into()))
    }

    fn ending(result: PlannedResult) -> Self {
        Self {
            progress: Vec::new(),
            chunks: Vec::new(),
            delay: None,
            result,
        }
    }

    pub fn with_progress(mut self, step: u32, total: u32, note: impl Into<String>) -> Self {
        self.progress.push((step, total, note.into()));
        self
    }

    pub fn with_chunk(mut self, delta: impl Into<String>) -> Self {
        self.chunks.push(delta.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// One observed execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub routing_key: String,
    pub retry_count: u32,
}

/// Executor following per-routing-key scripts.
///
/// Each execution pops the next [`AttemptPlan`] for the job's routing key;
/// keys without a script (or with an exhausted one) echo the job payload
/// back as a success. Every attempt is recorded, and a watch channel counts
/// started executions so tests can synchronize on "the worker has picked
/// the job up".
pub struct ScriptedExecutor {
    plans: Mutex<HashMap<String, VecDeque<AttemptPlan>>>,
    attempts: Mutex<Vec<AttemptRecord>>,
    started_tx: watch::Sender<usize>,
    started_rx: watch::Receiver<usize>,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        let (started_tx, started_rx) = watch::channel(0);
        Arc::new(Self {
            plans: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            started_tx,
            started_rx,
        })
    }

    /// Script the attempts for one routing key, in execution order.
    pub fn script(self: &Arc<Self>, routing_key: impl Into<String>, plans: Vec<AttemptPlan>) {
        self.plans
            .lock()
            .unwrap()
            .insert(routing_key.into(), plans.into());
    }

    /// Builder-style variant of [`ScriptedExecutor::script`].
    pub fn with_script(
        self: Arc<Self>,
        routing_key: impl Into<String>,
        plans: Vec<AttemptPlan>,
    ) -> Arc<Self> {
        self.script(routing_key, plans);
        self
    }

    /// All attempts observed so far, in execution order.
    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.attempts.lock().unwrap().clone()
    }

    /// Number of executions started so far.
    pub fn started(&self) -> usize {
        *self.started_rx.borrow()
    }

    /// Watch channel counting started executions.
    pub fn started_watch(&self) -> watch::Receiver<usize> {
        self.started_rx.clone()
    }

    /// Wait until at least `count` executions have started.
    pub async fn wait_for_started(&self, count: usize) {
        let mut rx = self.started_rx.clone();
        while *rx.borrow_and_update() < count {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn next_plan(&self, routing_key: &str, payload: &serde_json::Value) -> AttemptPlan {
        let mut plans = self.plans.lock().unwrap();
        plans
            .get_mut(routing_key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| AttemptPlan::success(json!({"echo": payload})))
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(
        &self,
        scope: &Scope,
        job: &Job,
        sink: &ProgressSink,
    ) -> Result<Outcome, DispatchError> {
        self.attempts.lock().unwrap().push(AttemptRecord {
            routing_key: job.routing_key.clone(),
            retry_count: job.retry_count,
        });
        self.started_tx.send_modify(|count| *count += 1);

        let plan = self.next_plan(&job.routing_key, &job.payload);

        if let Some(delay) = plan.delay {
            tokio::select! {
                biased;
                _ = scope.cancelled() => return Err(DispatchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        for (step, total, note) in plan.progress {
            sink.progress(step, total, note);
        }
        for delta in plan.chunks {
            sink.chunk(delta);
        }

        match plan.result {
            PlannedResult::Success(payload) => Ok(Outcome::Success(payload)),
            PlannedResult::Done => Ok(Outcome::Done),
            PlannedResult::Fail(err) => Err(err),
            PlannedResult::Panic(message) => panic!("{message}"),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
