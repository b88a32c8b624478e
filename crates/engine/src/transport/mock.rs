//! In-process transport for unit tests.

use std::sync::{Arc, Mutex};

use canary_core::error::TransportError;

use super::{InboundHandler, InboundMessage, Transport, TransportSession, topic_matches};

#[derive(Default)]
struct MockState {
    connected_as: Vec<String>,
    handlers: Vec<(String, InboundHandler)>,
    published: Vec<(String, Vec<u8>)>,
    disconnects: usize,
}

/// Records every operation and lets tests inject inbound messages.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    fail_connect: bool,
    fail_subscribe: bool,
    stall_publish: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn with_subscribe_failure(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    /// Publishes never get acknowledged.
    pub fn with_stalled_publish(mut self) -> Self {
        self.stall_publish = true;
        self
    }

    pub fn connected_as(&self) -> Vec<String> {
        self.state.lock().unwrap().connected_as.clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    pub fn subscriptions(&self) -> usize {
        self.state.lock().unwrap().handlers.len()
    }

    /// Delivers `payload` to every matching subscription, as the broker would.
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        let handlers: Vec<InboundHandler> = self
            .state
            .lock()
            .unwrap()
            .handlers
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(InboundMessage {
                topic: topic.to_owned(),
                payload: payload.to_vec(),
            });
        }
    }
}

impl Transport for MockTransport {
    type Session = MockTransport;

    async fn connect(&self, client_id: &str) -> Result<MockTransport, TransportError> {
        if self.fail_connect {
            return Err(TransportError::Connect("connection refused".to_owned()));
        }
        self.state
            .lock()
            .unwrap()
            .connected_as
            .push(client_id.to_owned());
        Ok(self.clone())
    }
}

impl TransportSession for MockTransport {
    async fn subscribe(&self, filter: &str, handler: InboundHandler) -> Result<(), TransportError> {
        if self.fail_subscribe {
            return Err(TransportError::Subscribe {
                topic: filter.to_owned(),
                reason: "not authorized".to_owned(),
            });
        }
        self.state
            .lock()
            .unwrap()
            .handlers
            .push((filter.to_owned(), handler));
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.stall_publish {
            std::future::pending::<()>().await;
        }
        self.state
            .lock()
            .unwrap()
            .published
            .push((topic.to_owned(), payload));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.handlers.clear();
        state.disconnects += 1;
        Ok(())
    }
}
