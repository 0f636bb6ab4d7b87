//! Streaming broadcast hub.
//!
//! Subscribers register against a routing key; publishers fan messages out
//! to every matching subscriber's bounded buffer. Publishing never blocks:
//! a subscriber whose buffer is full is scheduled for eviction instead of
//! being waited on, so a stuck client can never stall the worker pool.

use crate::message::Message;
use crate::metrics;
use crate::scope::Scope;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier for a registered subscriber.
pub type SubscriberId = Uuid;

/// Capacity of the shared inbound channel carrying subscriber frames to the
/// embedder.
const INBOUND_BUFFER: usize = 256;

/// A frame sent by a subscriber's remote peer, forwarded by its session
/// reader for the embedder to interpret.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub subscriber_id: SubscriberId,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

/// Receiving side of a hub registration.
///
/// Dropping the subscription closes its buffer; the hub notices on the next
/// publish and cleans up the registration.
pub struct Subscription {
    id: SubscriberId,
    routing_key: String,
    rx: mpsc::Receiver<Message>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Next message, or `None` once the hub unregistered this subscriber
    /// (eviction or shutdown) and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Adapt the subscription into a `Stream` of messages.
    pub fn into_stream(self) -> ReceiverStream<Message> {
        ReceiverStream::new(self.rx)
    }
}

#[derive(Debug)]
struct SubscriberEntry {
    routing_key: String,
    tx: mpsc::Sender<Message>,
}

#[derive(Debug, Default)]
struct HubState {
    // Primary index for fan-out, secondary for O(1) targeting. Both agree;
    // any mutation holds the write lock.
    by_key: HashMap<String, HashSet<SubscriberId>>,
    by_id: HashMap<SubscriberId, SubscriberEntry>,
}

/// In-process multiplexer routing messages to subscribers by routing key.
#[derive(Debug)]
pub struct Hub {
    state: RwLock<HubState>,
    subscriber_buffer: usize,
    evict_tx: mpsc::UnboundedSender<SubscriberId>,
    inbound_tx: mpsc::Sender<InboundFrame>,
    inbound_rx: std::sync::Mutex<Option<mpsc::Receiver<InboundFrame>>>,
}

impl Hub {
    /// Create the hub and spawn its maintenance task under `scope`.
    ///
    /// The maintenance task performs enqueued evictions so publishers never
    /// take the write lock themselves. It holds only a weak reference, so
    /// dropping the last strong handle tears the hub down.
    pub fn new(scope: &Scope, subscriber_buffer: usize) -> Arc<Self> {
        let (evict_tx, mut evict_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);

        let hub = Arc::new(Self {
            state: RwLock::new(HubState::default()),
            subscriber_buffer: subscriber_buffer.max(1),
            evict_tx,
            inbound_tx,
            inbound_rx: std::sync::Mutex::new(Some(inbound_rx)),
        });

        let weak = Arc::downgrade(&hub);
        let scope = scope.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = scope.cancelled() => break,
                    evicted = evict_rx.recv() => {
                        let Some(id) = evicted else { break };
                        let Some(hub) = weak.upgrade() else { break };
                        if hub.unregister(id) {
                            warn!(subscriber_id = %id, "evicted slow subscriber");
                            metrics::record_eviction();
                        }
                    }
                }
            }
            debug!("hub maintenance task stopped");
        });

        hub
    }

    /// Register a subscriber for `routing_key`.
    pub fn subscribe(&self, routing_key: impl Into<String>) -> Subscription {
        let routing_key = routing_key.into();
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);

        let mut state = self.state.write().unwrap();
        state
            .by_key
            .entry(routing_key.clone())
            .or_default()
            .insert(id);
        state.by_id.insert(
            id,
            SubscriberEntry {
                routing_key: routing_key.clone(),
                tx,
            },
        );
        metrics::set_subscribers_total(state.by_id.len());

        debug!(subscriber_id = %id, routing_key = %routing_key, "subscriber registered");
        Subscription {
            id,
            routing_key,
            rx,
        }
    }

    /// Remove a subscriber, closing its buffer. Idempotent; returns whether
    /// the registration existed.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut state = self.state.write().unwrap();
        let Some(entry) = state.by_id.remove(&id) else {
            return false;
        };

        if let Some(peers) = state.by_key.get_mut(&entry.routing_key) {
            peers.remove(&id);
            if peers.is_empty() {
                state.by_key.remove(&entry.routing_key);
            }
        }
        metrics::set_subscribers_total(state.by_id.len());

        debug!(subscriber_id = %id, routing_key = %entry.routing_key, "subscriber unregistered");
        true
    }

    /// Fan `message` out to every subscriber of its routing key.
    ///
    /// Never blocks: delivery is a `try_send` per subscriber, and a full (or
    /// dropped) buffer schedules that subscriber for eviction. Returns the
    /// number of buffers the message landed in.
    pub fn publish(&self, message: Message) -> usize {
        let state = self.state.read().unwrap();
        let Some(ids) = state.by_key.get(&message.routing_key) else {
            return 0;
        };

        let mut delivered = 0;
        for id in ids {
            let Some(entry) = state.by_id.get(id) else {
                continue;
            };
            match entry.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    // Full or dropped: unresponsive either way. The
                    // maintenance task performs the unregister.
                    let _ = self.evict_tx.send(*id);
                }
            }
        }

        metrics::record_published(message.kind.as_str(), delivered);
        delivered
    }

    /// Deliver `message` to a single subscriber, same non-blocking rules.
    pub fn publish_targeted(&self, id: SubscriberId, message: Message) -> bool {
        let state = self.state.read().unwrap();
        let Some(entry) = state.by_id.get(&id) else {
            return false;
        };

        match entry.tx.try_send(message) {
            Ok(()) => true,
            Err(_) => {
                let _ = self.evict_tx.send(id);
                false
            }
        }
    }

    /// Subscribers currently registered for `routing_key`.
    pub fn count(&self, routing_key: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .by_key
            .get(routing_key)
            .map_or(0, HashSet::len)
    }

    /// Subscribers currently registered, across all routing keys.
    pub fn total(&self) -> usize {
        self.state.read().unwrap().by_id.len()
    }

    /// Close every subscriber's buffer and clear the routing table.
    pub fn shutdown(&self) {
        let mut state = self.state.write().unwrap();
        // Dropping the senders closes the buffers; readers observe
        // end-of-stream once drained.
        state.by_id.clear();
        state.by_key.clear();
        metrics::set_subscribers_total(0);
        debug!("hub shut down");
    }

    /// Take the inbound channel carrying subscriber frames. Yields `Some`
    /// exactly once.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<InboundFrame>> {
        self.inbound_rx.lock().unwrap().take()
    }

    /// Sender used by session readers to forward inbound frames.
    pub(crate) fn inbound_sender(&self) -> mpsc::Sender<InboundFrame> {
        self.inbound_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use serde_json::json;

    fn msg(key: &str, seq: u64) -> Message {
        let mut job = Job::new(key, json!(null));
        // Stable ids keep assertions readable.
        job.id = Uuid::nil();
        Message::chunk(&job, seq, format!("delta-{seq}"))
    }

    #[tokio::test]
    async fn test_fanout_to_matching_key_only() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 8);

        let mut sub_a = hub.subscribe("conv-a");
        let mut sub_b = hub.subscribe("conv-b");

        let delivered = hub.publish(msg("conv-a", 0));
        assert_eq!(delivered, 1);

        let got = sub_a.recv().await.unwrap();
        assert_eq!(got.routing_key, "conv-a");
        assert!(sub_b.try_recv().is_none());

        scope.cancel();
    }

    #[tokio::test]
    async fn test_delivery_preserves_publish_order() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 16);

        let mut sub = hub.subscribe("conv-a");
        for seq in 0..10 {
            hub.publish(msg("conv-a", seq));
        }

        for expected in 0..10 {
            let got = sub.recv().await.unwrap();
            assert_eq!(got.sequence, expected);
        }

        scope.cancel();
    }

    #[tokio::test]
    async fn test_count_and_total() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 8);

        let s1 = hub.subscribe("conv-a");
        let _s2 = hub.subscribe("conv-a");
        let _s3 = hub.subscribe("conv-b");

        assert_eq!(hub.count("conv-a"), 2);
        assert_eq!(hub.count("conv-b"), 1);
        assert_eq!(hub.count("conv-c"), 0);
        assert_eq!(hub.total(), 3);

        hub.unregister(s1.id());
        assert_eq!(hub.count("conv-a"), 1);
        assert_eq!(hub.total(), 2);

        scope.cancel();
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 8);

        let sub = hub.subscribe("conv-a");
        assert!(hub.unregister(sub.id()));
        assert!(!hub.unregister(sub.id()));

        scope.cancel();
    }

    #[tokio::test]
    async fn test_slow_subscriber_evicted_others_unaffected() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 4);

        let slow = hub.subscribe("conv-a");
        let slow_id = slow.id();
        let mut healthy = hub.subscribe("conv-a");

        // Fill well past the slow subscriber's buffer while draining the
        // healthy one.
        for seq in 0..20 {
            hub.publish(msg("conv-a", seq));
            let got = healthy.recv().await.unwrap();
            assert_eq!(got.sequence, seq);
        }

        // Give the maintenance task a moment to process the eviction.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(hub.count("conv-a"), 1);
        assert!(!hub.unregister(slow_id), "eviction already unregistered it");

        drop(slow);
        scope.cancel();
    }

    #[tokio::test]
    async fn test_dropped_subscription_cleaned_on_publish() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 4);

        let sub = hub.subscribe("conv-a");
        drop(sub);

        hub.publish(msg("conv-a", 0));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(hub.total(), 0);

        scope.cancel();
    }

    #[tokio::test]
    async fn test_publish_targeted() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 8);

        let mut sub_a = hub.subscribe("conv-a");
        let mut sub_b = hub.subscribe("conv-a");

        assert!(hub.publish_targeted(sub_a.id(), msg("conv-a", 7)));

        let got = sub_a.recv().await.unwrap();
        assert_eq!(got.sequence, 7);
        assert!(sub_b.try_recv().is_none());

        assert!(!hub.publish_targeted(Uuid::new_v4(), msg("conv-a", 8)));

        scope.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_clears_and_closes() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 8);

        let mut sub = hub.subscribe("conv-a");
        hub.publish(msg("conv-a", 0));
        hub.shutdown();

        assert_eq!(hub.total(), 0);
        assert_eq!(hub.count("conv-a"), 0);

        // Buffered message still drains, then end-of-stream.
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());

        scope.cancel();
    }

    #[tokio::test]
    async fn test_take_inbound_yields_once() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 8);

        assert!(hub.take_inbound().is_some());
        assert!(hub.take_inbound().is_none());

        scope.cancel();
    }
}
