//! End-to-end scenarios for the assembled fabric.

use dispatch_fabric::{
    DispatchError, DispatchFabric, FabricConfig, Job, MessageKind, Scope,
};
use serde_json::json;
use std::time::Duration;
use test_utils::stream::{collect_n, collect_until_terminal};
use test_utils::{AttemptPlan, ChannelTransport, ScriptedExecutor};

fn fast_config() -> FabricConfig {
    FabricConfig::new()
        .with_rate_per_second(10_000.0)
        .with_retry_base_delay(Duration::from_millis(10))
}

#[tokio::test]
async fn happy_path_streams_progress_then_success() {
    let executor = ScriptedExecutor::new();
    for key in ["conv-a", "conv-b", "conv-c"] {
        executor.script(
            key,
            vec![AttemptPlan::success(json!({"result": format!("ok-{key}")}))
                .with_progress(1, 1, "working")],
        );
    }

    let config = fast_config().with_worker_count(2);
    let fabric = DispatchFabric::new(config, executor.clone()).unwrap();

    let mut subs = Vec::new();
    for key in ["conv-a", "conv-b", "conv-c"] {
        subs.push((key, fabric.subscribe(key)));
    }
    for key in ["conv-a", "conv-b", "conv-c"] {
        fabric.submit(Job::new(key, json!({"input": key}))).unwrap();
    }

    for (key, sub) in &mut subs {
        let messages = collect_until_terminal(sub, Duration::from_secs(5)).await;
        assert_eq!(messages.len(), 2, "stream for {key}");

        assert_eq!(messages[0].kind, MessageKind::Progress);
        assert_eq!(messages[0].sequence, 0);

        assert_eq!(messages[1].kind, MessageKind::Success);
        assert_eq!(messages[1].sequence, 1);
        assert_eq!(
            messages[1].payload["result"],
            format!("ok-{key}").as_str()
        );
        assert_eq!(messages[0].job_id, messages[1].job_id);
    }

    let snap = fabric.wait().await;
    assert_eq!(snap.submitted, 3);
    assert_eq!(snap.succeeded, 3);
    assert_eq!(snap.failed, 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_bounds_execution_rate() {
    let executor = ScriptedExecutor::new();
    // rate 2/s, burst ⌈2⌉+1 = 3: ten jobs need seven refills at 500ms each.
    let config = FabricConfig::new()
        .with_worker_count(5)
        .with_queue_capacity(16)
        .with_rate_per_second(2.0);
    let fabric = DispatchFabric::new(config, executor.clone()).unwrap();

    let mut sub = fabric.subscribe("rated");
    let started = tokio::time::Instant::now();
    for n in 0..10 {
        fabric.submit(Job::new("rated", json!({"n": n}))).unwrap();
    }

    let messages = collect_n(&mut sub, 10, Duration::from_secs(60)).await;
    let elapsed = started.elapsed();

    assert!(messages.iter().all(|m| m.kind == MessageKind::Success));
    assert!(
        elapsed >= Duration::from_millis(3400),
        "ten jobs at 2/s with burst 3 finished in {elapsed:?}"
    );
    assert!(elapsed < Duration::from_secs(10), "took {elapsed:?}");

    let snap = fabric.wait().await;
    assert_eq!(snap.succeeded, 10);
}

#[tokio::test]
async fn transient_failures_retried_then_succeed() {
    let executor = ScriptedExecutor::new();
    executor.script(
        "conv-x",
        vec![
            AttemptPlan::transient("net: connection reset"),
            AttemptPlan::transient("net: connection reset"),
            AttemptPlan::success(json!({"result": "ok"})),
        ],
    );

    let config = fast_config().with_worker_count(2).with_max_retries(3);
    let fabric = DispatchFabric::new(config, executor.clone()).unwrap();

    let mut sub = fabric.subscribe("conv-x");
    fabric.submit(Job::new("conv-x", json!(null))).unwrap();

    let messages = collect_until_terminal(&mut sub, Duration::from_secs(5)).await;

    // Two retry notices, then the success terminal.
    let terminal = messages.last().unwrap();
    assert_eq!(terminal.kind, MessageKind::Success);
    assert_eq!(terminal.payload["result"], "ok");

    let notices: Vec<_> = messages
        .iter()
        .filter(|m| m.kind == MessageKind::Progress)
        .collect();
    assert_eq!(notices.len(), 2);
    assert!(notices[0].payload["note"]
        .as_str()
        .unwrap()
        .contains("retrying"));

    // Sequences stay monotonic across attempts.
    let sequences: Vec<_> = messages.iter().map(|m| m.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);

    // The value carried forward is the failed attempt's count plus one.
    let attempts: Vec<_> = executor
        .attempts()
        .into_iter()
        .map(|a| a.retry_count)
        .collect();
    assert_eq!(attempts, vec![0, 1, 2]);

    let snap = fabric.wait().await;
    assert_eq!(snap.retries, 2);
    assert_eq!(snap.succeeded, 1);
    assert_eq!(snap.failed, 0);
}

#[tokio::test]
async fn cancellation_finalizes_every_job_promptly() {
    let executor = ScriptedExecutor::new();
    executor.script(
        "slow",
        vec![AttemptPlan::success(json!(1)).with_delay(Duration::from_secs(10)); 30],
    );

    let config = fast_config().with_worker_count(8).with_queue_capacity(64);
    let fabric = DispatchFabric::new(config, executor.clone()).unwrap();
    let hub = fabric.hub();

    let mut sub = fabric.subscribe("slow");
    for _ in 0..30 {
        fabric.submit(Job::new("slow", json!(null))).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    let cancelled_at = std::time::Instant::now();
    fabric.scope().cancel();
    let snap = fabric.stop().await;
    assert!(
        cancelled_at.elapsed() < Duration::from_millis(500),
        "stop took {:?}",
        cancelled_at.elapsed()
    );

    // Only the eight in-flight executions ever started.
    assert!(executor.started() <= 8);

    // Every accepted job still got exactly one terminal.
    let messages = collect_n(&mut sub, 30, Duration::from_secs(5)).await;
    assert!(messages.iter().all(|m| m.kind == MessageKind::Cancelled));

    assert_eq!(snap.submitted, 30);
    assert_eq!(snap.completed, 30);
    assert_eq!(snap.failed, 30);
    assert_eq!(snap.in_progress, 0);

    // Nothing spawned by the core is left registered.
    assert_eq!(hub.total(), 0);
}

#[tokio::test]
async fn slow_subscriber_evicted_without_stalling_others() {
    let scope = Scope::new();
    let hub = dispatch_fabric::Hub::new(&scope, 32);

    let slow = hub.subscribe("feed");
    let slow_id = slow.id();
    let mut healthy = hub.subscribe("feed");

    let reader = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(msg) = healthy.recv().await {
            seen.push(msg.sequence);
            if seen.len() == 1000 {
                break;
            }
        }
        seen
    });

    let job = Job::new("feed", json!(null));
    let publish_started = std::time::Instant::now();
    for seq in 0..1000u64 {
        hub.publish(dispatch_fabric::Message::chunk(&job, seq, "x"));
        // Stay just behind the healthy reader without ever waiting on the
        // slow one.
        if seq % 16 == 0 {
            tokio::task::yield_now().await;
        }
    }
    let publish_elapsed = publish_started.elapsed();

    let seen = reader.await.expect("reader task failed");
    assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    assert!(
        publish_elapsed < Duration::from_secs(2),
        "publishing stalled: {publish_elapsed:?}"
    );

    // The never-draining subscriber is gone; the healthy one remains.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hub.count("feed"), 1);
    assert!(!hub.unregister(slow_id));

    drop(slow);
    scope.cancel();
}

#[tokio::test]
async fn queue_full_backpressure_is_deterministic() {
    let executor = ScriptedExecutor::new();
    executor.script(
        "bp",
        vec![AttemptPlan::success(json!(null)).with_delay(Duration::from_secs(10)); 5],
    );

    let config = fast_config().with_worker_count(1).with_queue_capacity(2);
    let fabric = DispatchFabric::new(config, executor.clone()).unwrap();

    // First job: wait until the worker has pulled it off the queue.
    fabric.submit(Job::new("bp", json!(0))).unwrap();
    executor.wait_for_started(1).await;

    let results: Vec<_> = (1..5)
        .map(|n| fabric.submit(Job::new("bp", json!(n))))
        .collect();

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let full = results
        .iter()
        .filter(|r| matches!(r, Err(DispatchError::QueueFull)))
        .count();
    assert_eq!(ok, 2, "one running + two queued");
    assert_eq!(full, 2, "the rest bounce");

    let snap = fabric.stop().await;
    assert_eq!(snap.submitted, 3);
    assert_eq!(snap.completed, 3);
}

#[tokio::test]
async fn mixed_outcomes_conserve_one_terminal_per_job() {
    let executor = ScriptedExecutor::new();
    executor.script(
        "retry-then-ok",
        vec![
            AttemptPlan::transient("flaky"),
            AttemptPlan::success(json!("ok")),
        ],
    );
    executor.script("rejected", vec![AttemptPlan::permanent("bad input")]);
    executor.script("crashed", vec![AttemptPlan::panic("executor bug")]);
    executor.script("finished", vec![AttemptPlan::done().with_chunk("tail")]);

    let keys = ["retry-then-ok", "rejected", "crashed", "finished"];
    let config = fast_config().with_worker_count(3).with_max_retries(2);
    let fabric = DispatchFabric::new(config, executor.clone()).unwrap();

    let mut subs = Vec::new();
    for key in keys {
        subs.push((key, fabric.subscribe(key)));
    }
    for key in keys {
        fabric.submit(Job::new(key, json!(null))).unwrap();
    }

    let mut terminal_kinds = Vec::new();
    for (key, sub) in &mut subs {
        let messages = collect_until_terminal(sub, Duration::from_secs(5)).await;
        let terminals = messages.iter().filter(|m| m.is_terminal()).count();
        assert_eq!(terminals, 1, "stream for {key}");
        terminal_kinds.push((*key, messages.last().unwrap().kind));
    }

    assert_eq!(terminal_kinds[0].1, MessageKind::Success);
    assert_eq!(terminal_kinds[1].1, MessageKind::Failure);
    assert_eq!(terminal_kinds[2].1, MessageKind::Failure);
    assert_eq!(terminal_kinds[3].1, MessageKind::Success);

    let snap = fabric.wait().await;
    assert_eq!(snap.submitted, 4);
    assert_eq!(snap.completed, 4);
    assert_eq!(snap.succeeded, 2);
    assert_eq!(snap.failed, 2);
    assert_eq!(snap.retries, 1);
    assert_eq!(snap.completed, snap.succeeded + snap.failed);
}

#[tokio::test(start_paused = true)]
async fn session_pumps_messages_and_heartbeats() {
    let executor = ScriptedExecutor::new();
    let config = fast_config()
        .with_worker_count(1)
        .with_read_deadline(Duration::from_millis(200));
    let fabric = DispatchFabric::new(config, executor.clone()).unwrap();
    let hub = fabric.hub();

    let (transport, mut probe) = ChannelTransport::pair();
    let session = fabric.subscribe_session("conv-ws", transport);
    assert_eq!(hub.count("conv-ws"), 1);

    fabric
        .submit(Job::new("conv-ws", json!({"q": "stream me"})))
        .unwrap();

    let first = probe.sent_rx.recv().await.unwrap();
    assert_eq!(first.kind, MessageKind::Success);

    // Keep the peer chatty and observe a heartbeat ping (at 9/10 of the
    // read deadline).
    probe.inbound_tx.send(b"ack".to_vec()).unwrap();
    let next = probe.sent_rx.recv().await.unwrap();
    assert_eq!(next.kind, MessageKind::Heartbeat);

    // A peer that goes silent is unregistered at the read deadline.
    drop(probe);
    session.closed().await;
    assert_eq!(hub.count("conv-ws"), 0);

    fabric.wait().await;
}
