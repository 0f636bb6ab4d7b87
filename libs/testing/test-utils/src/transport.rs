//! In-memory session transport with probes on both directions.

use async_trait::async_trait;
use dispatch_fabric::{DispatchError, Message, SessionTransport};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Transport whose wire is a pair of in-process channels.
pub struct ChannelTransport {
    sent_tx: mpsc::UnboundedSender<Message>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

/// Test-side ends of a [`ChannelTransport`]: observe what the session sent,
/// feed it inbound frames. Dropping `inbound_tx` acts as the peer closing.
pub struct TransportProbe {
    pub sent_rx: mpsc::UnboundedReceiver<Message>,
    pub inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelTransport {
    /// Create a transport and the probe observing it.
    pub fn pair() -> (Arc<Self>, TransportProbe) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                sent_tx,
                inbound: Mutex::new(inbound_rx),
            }),
            TransportProbe {
                sent_rx,
                inbound_tx,
            },
        )
    }
}

#[async_trait]
impl SessionTransport for ChannelTransport {
    async fn send(&self, message: &Message) -> Result<(), DispatchError> {
        self.sent_tx
            .send(message.clone())
            .map_err(|_| DispatchError::Internal("transport probe dropped".into()))
    }

    async fn recv(&self) -> Option<Vec<u8>> {
        // The session reader is the only caller, so holding the lock across
        // the await never contends.
        self.inbound.lock().await.recv().await
    }
}
