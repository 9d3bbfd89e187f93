// Client-bound notifications
//
// The session raises events toward the debugging UI through this channel;
// the transport writer task owns the actual wire.

use crate::protocol::Event;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::warn;

#[async_trait]
pub trait ClientChannel: Send + Sync {
    /// Deliver an event to the client. Failures are logged, not surfaced:
    /// a client that stopped listening is handled by the disconnect path.
    async fn send_event(&self, event: Event);
}

/// Forwards events to the transport writer task
pub struct DapClientChannel {
    outbound: mpsc::Sender<Value>,
}

impl DapClientChannel {
    pub fn new(outbound: mpsc::Sender<Value>) -> Self {
        Self { outbound }
    }
}

#[async_trait]
impl ClientChannel for DapClientChannel {
    async fn send_event(&self, event: Event) {
        let encoded = match serde_json::to_value(&event) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Failed to encode event '{}': {}", event.event, e);
                return;
            }
        };

        if self.outbound.send(encoded).await.is_err() {
            warn!("Client channel closed, dropping event '{}'", event.event);
        }
    }
}

/// Readiness notification: unblocks the client's own setup requests
pub fn initialized_event() -> Event {
    Event::new("initialized", None)
}

pub fn terminated_event() -> Event {
    Event::new("terminated", None)
}

pub fn stopped_event(reason: &str, description: Option<String>) -> Event {
    let mut body = json!({
        "reason": reason,
        "threadId": 1,
        "allThreadsStopped": true,
    });
    if let Some(description) = description {
        body["description"] = Value::String(description);
    }
    Event::new("stopped", Some(body))
}

pub fn continued_event() -> Event {
    Event::new(
        "continued",
        Some(json!({"threadId": 1, "allThreadsContinued": true})),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_the_writer_channel() {
        let (tx, mut rx) = mpsc::channel(8);
        let channel = DapClientChannel::new(tx);

        channel.send_event(stopped_event("breakpoint", None)).await;

        let sent = rx.recv().await.unwrap();
        assert_eq!(sent["type"], "event");
        assert_eq!(sent["event"], "stopped");
        assert_eq!(sent["body"]["reason"], "breakpoint");
    }

    #[tokio::test]
    async fn test_closed_channel_does_not_panic() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let channel = DapClientChannel::new(tx);
        channel.send_event(terminated_event()).await;
    }
}
