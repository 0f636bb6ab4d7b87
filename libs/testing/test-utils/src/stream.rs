//! Helpers for draining subscriptions with deadlines.

use dispatch_fabric::{Message, Subscription};
use std::time::Duration;

/// Receive one message or panic after `deadline`.
pub async fn recv_within(sub: &mut Subscription, deadline: Duration) -> Message {
    tokio::time::timeout(deadline, sub.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("subscription closed while waiting for a message")
}

/// Collect messages until (and including) the job stream's terminal.
///
/// Panics if no terminal arrives within `deadline`.
pub async fn collect_until_terminal(sub: &mut Subscription, deadline: Duration) -> Vec<Message> {
    let drain = async {
        let mut messages = Vec::new();
        loop {
            match sub.recv().await {
                Some(message) => {
                    let terminal = message.is_terminal();
                    messages.push(message);
                    if terminal {
                        return messages;
                    }
                }
                None => return messages,
            }
        }
    };

    tokio::time::timeout(deadline, drain)
        .await
        .expect("timed out waiting for a terminal message")
}

/// Collect exactly `count` messages, panicking after `deadline`.
pub async fn collect_n(sub: &mut Subscription, count: usize, deadline: Duration) -> Vec<Message> {
    let drain = async {
        let mut messages = Vec::with_capacity(count);
        while messages.len() < count {
            match sub.recv().await {
                Some(message) => messages.push(message),
                None => break,
            }
        }
        messages
    };

    let messages = tokio::time::timeout(deadline, drain)
        .await
        .expect("timed out collecting messages");
    assert_eq!(messages.len(), count, "subscription closed early");
    messages
}
