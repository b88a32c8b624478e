//! Message transport abstraction.
//!
//! The probe speaks to the broker through [`Transport`] so tests can swap the
//! MQTT client for an in-process fake. Every operation resolves only after the
//! broker acknowledged it (CONNACK / SUBACK / PUBCOMP); callers bound the wait.

use std::future::Future;
use std::sync::Arc;

use canary_core::error::TransportError;

#[cfg(test)]
pub(crate) mod mock;
pub mod mqtt;

pub use mqtt::MqttTransport;

/// A message delivered on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Callback invoked for every inbound message of a subscription.
///
/// Runs on the transport's event-loop task, so it must not block.
pub type InboundHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Factory for broker sessions.
pub trait Transport: Send + Sync + 'static {
    type Session: TransportSession;

    /// Opens a session identified by `client_id` and waits for the broker's
    /// connection acknowledgment.
    fn connect(
        &self,
        client_id: &str,
    ) -> impl Future<Output = Result<Self::Session, TransportError>> + Send;
}

/// An open broker session. Clones share the same connection.
pub trait TransportSession: Clone + Send + Sync + 'static {
    /// Subscribes to `filter` with exactly-once delivery.
    fn subscribe(
        &self,
        filter: &str,
        handler: InboundHandler,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Publishes `payload` to `topic` with exactly-once delivery.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes the session. Subscription handlers are dropped.
    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// MQTT topic filter matching with `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_topic_matches() {
        assert!(topic_matches("event/abc/sensor", "event/abc/sensor"));
        assert!(!topic_matches("event/abc/sensor", "event/abc/other"));
    }

    #[test]
    fn single_level_wildcard() {
        assert!(topic_matches("command/abc/+", "command/abc/cmd"));
        assert!(!topic_matches("command/abc/+", "command/abc"));
        assert!(!topic_matches("command/abc/+", "command/abc/cmd/extra"));
        assert!(!topic_matches("command/abc/+", "command/xyz/cmd"));
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(topic_matches("command/#", "command/abc/cmd"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("response/#", "command/abc"));
    }

    #[test]
    fn length_mismatch_does_not_match() {
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
    }
}
