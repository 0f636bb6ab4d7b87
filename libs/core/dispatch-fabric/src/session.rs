//! Subscriber sessions: the reader/writer pump between the hub and a
//! transport.
//!
//! The fabric does not speak any wire protocol; adapters implement
//! [`SessionTransport`] over whatever framing they use. The session owns
//! liveness: the writer pings at 9/10 of the read deadline, and a peer that
//! stays silent past the deadline (or sends an oversized frame) is closed
//! and unregistered.

use crate::config::FabricConfig;
use crate::error::DispatchError;
use crate::hub::{Hub, InboundFrame, SubscriberId};
use crate::message::Message;
use crate::scope::Scope;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Transport seam between a subscriber session and its remote peer.
#[async_trait]
pub trait SessionTransport: Send + Sync + 'static {
    /// Deliver an outbound message to the peer.
    async fn send(&self, message: &Message) -> Result<(), DispatchError>;

    /// Next inbound frame from the peer; `None` once the peer closed.
    async fn recv(&self) -> Option<Vec<u8>>;
}

/// Liveness and sizing knobs for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    pub read_deadline: Duration,
    pub max_message_bytes: usize,
}

impl SessionConfig {
    pub fn from_fabric(config: &FabricConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            read_deadline: config.read_deadline,
            max_message_bytes: config.max_message_bytes,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_fabric(&FabricConfig::new())
    }
}

/// A running subscriber session: one hub registration plus the two tasks
/// pumping it.
///
/// Either task exiting (peer closed, deadline missed, oversized frame, send
/// failure, scope cancelled) cancels the session scope, stopping its twin
/// and unregistering the subscriber. Unregister is idempotent, so the
/// double call from the two tasks is harmless.
pub struct SubscriberSession {
    id: SubscriberId,
    routing_key: String,
    session_scope: Scope,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SubscriberSession {
    /// Register a subscriber and spawn its reader/writer tasks under `scope`.
    pub fn spawn(
        hub: Arc<Hub>,
        scope: &Scope,
        routing_key: impl Into<String>,
        transport: Arc<dyn SessionTransport>,
        config: SessionConfig,
    ) -> Self {
        let routing_key = routing_key.into();
        let mut subscription = hub.subscribe(&routing_key);
        let id = subscription.id();
        let session_scope = scope.child();
        let SessionConfig {
            heartbeat_interval,
            read_deadline,
            max_message_bytes,
        } = config;

        let writer = {
            let hub = hub.clone();
            let transport = transport.clone();
            let session_scope = session_scope.clone();
            let routing_key = routing_key.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(heartbeat_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // Consume the immediate first tick so pings start one
                // interval after connect.
                ticker.tick().await;
                let mut heartbeat_seq: u64 = 0;

                loop {
                    tokio::select! {
                        biased;
                        _ = session_scope.cancelled() => break,
                        _ = ticker.tick() => {
                            let ping = Message::heartbeat(routing_key.clone(), heartbeat_seq);
                            heartbeat_seq += 1;
                            if transport.send(&ping).await.is_err() {
                                debug!(subscriber_id = %id, "heartbeat send failed, closing session");
                                break;
                            }
                        }
                        outbound = subscription.recv() => {
                            let Some(message) = outbound else {
                                // Evicted or hub shut down.
                                break;
                            };
                            if transport.send(&message).await.is_err() {
                                debug!(subscriber_id = %id, "outbound send failed, closing session");
                                break;
                            }
                        }
                    }
                }

                session_scope.cancel();
                hub.unregister(id);
            })
        };

        let reader = {
            let hub = hub.clone();
            let transport = transport.clone();
            let session_scope = session_scope.clone();
            let routing_key = routing_key.clone();
            tokio::spawn(async move {
                let inbound = hub.inbound_sender();

                loop {
                    let frame = tokio::select! {
                        biased;
                        _ = session_scope.cancelled() => break,
                        frame = tokio::time::timeout(read_deadline, transport.recv()) => frame,
                    };

                    match frame {
                        Err(_) => {
                            warn!(
                                subscriber_id = %id,
                                deadline = ?read_deadline,
                                "subscriber missed read deadline, closing session"
                            );
                            break;
                        }
                        Ok(None) => {
                            debug!(subscriber_id = %id, "peer closed, closing session");
                            break;
                        }
                        Ok(Some(payload)) => {
                            if payload.len() > max_message_bytes {
                                warn!(
                                    subscriber_id = %id,
                                    size = payload.len(),
                                    limit = max_message_bytes,
                                    "inbound frame over size limit, closing session"
                                );
                                break;
                            }

                            let frame = InboundFrame {
                                subscriber_id: id,
                                routing_key: routing_key.clone(),
                                payload,
                            };
                            let forwarded = tokio::select! {
                                biased;
                                _ = session_scope.cancelled() => break,
                                res = inbound.send(frame) => res,
                            };
                            if forwarded.is_err() {
                                break;
                            }
                        }
                    }
                }

                session_scope.cancel();
                hub.unregister(id);
            })
        };

        Self {
            id,
            routing_key,
            session_scope,
            reader,
            writer,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Ask the session to stop; both tasks observe the cancellation.
    pub fn close(&self) {
        self.session_scope.cancel();
    }

    /// Wait for both pump tasks to exit.
    pub async fn closed(self) {
        let _ = self.reader.await;
        let _ = self.writer.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::sync::Mutex;

    /// In-memory transport: outbound messages land in a channel, inbound
    /// frames are fed through another.
    struct PipeTransport {
        sent_tx: mpsc::UnboundedSender<Message>,
        inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    }

    struct PipeEnds {
        sent_rx: mpsc::UnboundedReceiver<Message>,
        inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    }

    fn pipe() -> (Arc<PipeTransport>, PipeEnds) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Arc::new(PipeTransport {
                sent_tx,
                inbound: Mutex::new(inbound_rx),
            }),
            PipeEnds {
                sent_rx,
                inbound_tx,
            },
        )
    }

    #[async_trait]
    impl SessionTransport for PipeTransport {
        async fn send(&self, message: &Message) -> Result<(), DispatchError> {
            self.sent_tx
                .send(message.clone())
                .map_err(|_| DispatchError::Internal("transport closed".into()))
        }

        async fn recv(&self) -> Option<Vec<u8>> {
            // The session reader is the only caller, so holding the lock
            // across the await never contends.
            self.inbound.lock().await.recv().await
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            heartbeat_interval: Duration::from_millis(90),
            read_deadline: Duration::from_millis(100),
            max_message_bytes: 64,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_messages_reach_transport() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 16);
        let (transport, mut ends) = pipe();

        let session =
            SubscriberSession::spawn(hub.clone(), &scope, "conv-a", transport, test_config());
        assert_eq!(hub.count("conv-a"), 1);

        let job = crate::job::Job::new("conv-a", serde_json::json!(null));
        hub.publish(Message::chunk(&job, 0, "hello"));

        let sent = ends.sent_rx.recv().await.unwrap();
        assert_eq!(sent.payload["delta"], "hello");

        session.close();
        session.closed().await;
        assert_eq!(hub.total(), 0);
        scope.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_cadence() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 16);
        let (transport, mut ends) = pipe();

        let session =
            SubscriberSession::spawn(hub.clone(), &scope, "conv-a", transport, test_config());

        // Keep the reader alive past several heartbeats.
        for _ in 0..3 {
            ends.inbound_tx.send(b"ok".to_vec()).unwrap();
            let ping = ends.sent_rx.recv().await.unwrap();
            assert_eq!(ping.kind, crate::message::MessageKind::Heartbeat);
        }

        session.close();
        session.closed().await;
        scope.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_deadline_closes_session() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 16);
        let (transport, ends) = pipe();

        let session =
            SubscriberSession::spawn(hub.clone(), &scope, "conv-a", transport, test_config());
        assert_eq!(hub.total(), 1);

        // No inbound frames at all: the reader must give up at the deadline.
        session.closed().await;
        assert_eq!(hub.total(), 0);

        drop(ends);
        scope.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_frame_closes_session() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 16);
        let (transport, ends) = pipe();

        let session =
            SubscriberSession::spawn(hub.clone(), &scope, "conv-a", transport, test_config());

        ends.inbound_tx.send(vec![0u8; 65]).unwrap();

        session.closed().await;
        assert_eq!(hub.total(), 0);
        scope.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_frames_forwarded_to_hub() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 16);
        let mut inbound = hub.take_inbound().unwrap();
        let (transport, ends) = pipe();

        let session =
            SubscriberSession::spawn(hub.clone(), &scope, "conv-a", transport, test_config());

        ends.inbound_tx.send(b"client says hi".to_vec()).unwrap();

        let frame = inbound.recv().await.unwrap();
        assert_eq!(frame.subscriber_id, session.id());
        assert_eq!(frame.routing_key, "conv-a");
        assert_eq!(frame.payload, b"client says hi");

        session.close();
        session.closed().await;
        scope.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scope_cancel_stops_session() {
        let scope = Scope::new();
        let hub = Hub::new(&scope, 16);
        let (transport, ends) = pipe();

        let session =
            SubscriberSession::spawn(hub.clone(), &scope, "conv-a", transport, test_config());

        scope.cancel();
        session.closed().await;
        assert_eq!(hub.total(), 0);
        drop(ends);
    }
}
