//! Device-side connectivity probe.
//!
//! Plays the canary device against the broker:
//!
//! ```text
//! Disconnected ──connect──▶ Connected ──subscribe──▶ Subscribed
//!       ▲                                                │
//!       └──────────disconnect─────────── Published ◀─publish
//! ```
//!
//! While subscribed, an auto-responder answers every command the platform
//! delivers to the device. The transport callback only counts the command and
//! hands the raw message to a detached worker, which validates it and
//! publishes the response.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use canary_core::config::CanaryConfig;
use canary_core::error::TransportError;
use canary_core::metrics::{CONNECTOR_LOGIN, CONNECTOR_PUBLISH, CONNECTOR_SUBSCRIBE};
use canary_core::types::Device;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::envelope::{
    CommandEnvelope, CommandTracker, ResponseEnvelope, command_filter, event_topic,
    expected_command_payload, response_topic, sensor_reading,
};
use crate::recorder::{OutcomeRecorder, metered, uncategorized};
use crate::transport::{InboundHandler, InboundMessage, Transport, TransportSession};

/// Inbound commands buffered ahead of the responder worker.
const RESPONDER_QUEUE: usize = 32;

/// Connectivity probe for the canary device.
pub struct ConnectionProbe<T: Transport> {
    transport: Arc<T>,
    recorder: Arc<dyn OutcomeRecorder>,
    tracker: CommandTracker,
    segment: String,
    segment_2: String,
    ack_timeout: Duration,
}

impl<T: Transport> ConnectionProbe<T> {
    pub fn new(
        config: &CanaryConfig,
        transport: Arc<T>,
        recorder: Arc<dyn OutcomeRecorder>,
        tracker: CommandTracker,
    ) -> Self {
        Self {
            transport,
            recorder,
            tracker,
            segment: config.device_type.protocol_segment_name.clone(),
            segment_2: config.device_type.protocol_segment_name_2.clone(),
            ack_timeout: config.timing.transport_ack_timeout(),
        }
    }

    async fn bounded<R, F>(&self, op: &str, call: F) -> Result<R, TransportError>
    where
        F: Future<Output = Result<R, TransportError>>,
    {
        match tokio::time::timeout(self.ack_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::AckTimeout {
                op: op.to_owned(),
                timeout_ms: self.ack_timeout.as_millis() as u64,
            }),
        }
    }

    /// Connects as the hub.
    pub async fn connect(&self, hub_id: &str) -> Result<T::Session, TransportError> {
        let session = metered(
            &*self.recorder,
            CONNECTOR_LOGIN,
            self.bounded("connect", self.transport.connect(hub_id)),
        )
        .await?;
        info!(hub_id, "probe connected");
        Ok(session)
    }

    /// Subscribes to the device's command topics and starts the auto-responder.
    pub async fn subscribe(
        &self,
        session: &T::Session,
        device: &Device,
    ) -> Result<(), TransportError> {
        let (tx, rx) = mpsc::channel::<InboundMessage>(RESPONDER_QUEUE);

        let tracker = self.tracker.clone();
        let recorder = Arc::clone(&self.recorder);
        let handler: InboundHandler = Arc::new(move |message: InboundMessage| {
            tracker.record();
            if let Err(e) = tx.try_send(message) {
                uncategorized(&*recorder, "command responder queue", e);
            }
        });

        // exits once the session drops the handler and with it the sender
        tokio::spawn(respond(
            rx,
            session.clone(),
            Arc::clone(&self.recorder),
            self.ack_timeout,
        ));

        let filter = command_filter(&device.local_id);
        metered(
            &*self.recorder,
            CONNECTOR_SUBSCRIBE,
            self.bounded("subscribe", session.subscribe(&filter, handler)),
        )
        .await?;
        debug!(filter, "probe subscribed");
        Ok(())
    }

    /// Publishes one sensor reading for the device.
    pub async fn publish(
        &self,
        session: &T::Session,
        device: &Device,
        value1: i64,
        value2: i64,
    ) -> Result<(), TransportError> {
        let topic = event_topic(&device.local_id);
        let payload = sensor_reading(&self.segment, &self.segment_2, value1, value2);
        metered(
            &*self.recorder,
            CONNECTOR_PUBLISH,
            self.bounded("publish", session.publish(&topic, payload)),
        )
        .await?;
        debug!(topic, value1, value2, "sensor reading published");
        Ok(())
    }

    pub async fn disconnect(&self, session: &T::Session) {
        if let Err(e) = session.disconnect().await {
            warn!(error = %e, "probe disconnect failed");
        }
    }
}

async fn respond<S: TransportSession>(
    mut inbound: mpsc::Receiver<InboundMessage>,
    session: S,
    recorder: Arc<dyn OutcomeRecorder>,
    ack_timeout: Duration,
) {
    let expected = expected_command_payload();

    while let Some(message) = inbound.recv().await {
        let command: CommandEnvelope = match serde_json::from_slice(&message.payload) {
            Ok(command) => command,
            Err(e) => {
                uncategorized(&*recorder, "decode command envelope", e);
                continue;
            }
        };

        if command.payload != expected {
            warn!(
                expected = ?expected,
                observed = ?command.payload,
                "unexpected command payload"
            );
            uncategorized(
                &*recorder,
                "validate command payload",
                format!("{:?}", command.payload),
            );
        }

        let body = match serde_json::to_vec(&ResponseEnvelope::empty_for(&command)) {
            Ok(body) => body,
            Err(e) => {
                uncategorized(&*recorder, "encode command response", e);
                continue;
            }
        };

        let topic = response_topic(&message.topic);
        match tokio::time::timeout(ack_timeout, session.publish(&topic, body)).await {
            Ok(Ok(())) => debug!(topic, correlation_id = %command.correlation_id, "command answered"),
            Ok(Err(e)) => uncategorized(&*recorder, "publish command response", e),
            Err(_) => uncategorized(&*recorder, "publish command response", "ack timeout"),
        }
    }
}
