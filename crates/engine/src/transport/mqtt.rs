//! MQTT transport backed by `rumqttc`.
//!
//! rumqttc only reports packet ids on its event loop, so acknowledgment
//! tracking works in two steps: a caller queues a waiter and hands the request
//! to the client, the event loop pairs the queue front with the packet id when
//! the request goes out (`Outgoing::Publish/Subscribe`), and resolves it when
//! the matching PUBCOMP / SUBACK arrives.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use canary_core::config::CanaryConfig;
use canary_core::error::TransportError;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{InboundHandler, InboundMessage, Transport, TransportSession, topic_matches};

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 64;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

type Waiter = oneshot::Sender<Result<(), TransportError>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Parsed broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    /// Parses `tcp://`, `mqtt://`, `ssl://` or `mqtts://` broker URLs.
    pub fn parse(raw: &str) -> Result<Self, TransportError> {
        let invalid = |reason: &str| TransportError::InvalidBrokerUrl {
            url: raw.to_owned(),
            reason: reason.to_owned(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        let tls = match url.scheme() {
            "tcp" | "mqtt" => false,
            "ssl" | "tls" | "mqtts" => true,
            other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?
            .to_owned();
        let port = url
            .port()
            .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

        Ok(Self { host, port, tls })
    }
}

/// Production [`Transport`] for the platform's MQTT broker.
#[derive(Clone)]
pub struct MqttTransport {
    broker: BrokerAddress,
    username: String,
    password: String,
    linger: Duration,
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("broker", &self.broker)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl MqttTransport {
    /// Broker URL and credentials come from `endpoints` and `auth`.
    pub fn from_config(config: &CanaryConfig) -> Result<Self, TransportError> {
        Ok(Self {
            broker: BrokerAddress::parse(&config.endpoints.mqtt_broker_url)?,
            username: config.auth.username.clone(),
            password: config.auth.password.clone(),
            linger: config.timing.disconnect_linger(),
        })
    }

    fn options(&self, client_id: &str) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.broker.host.clone(), self.broker.port);
        options
            .set_keep_alive(KEEP_ALIVE)
            .set_clean_session(true)
            .set_credentials(self.username.clone(), self.password.clone());
        if self.broker.tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        options
    }
}

impl Transport for MqttTransport {
    type Session = MqttSession;

    async fn connect(&self, client_id: &str) -> Result<MqttSession, TransportError> {
        let (client, event_loop) = AsyncClient::new(self.options(client_id), REQUEST_CAPACITY);
        let shared = Arc::new(Shared::default());
        let (connected_tx, connected_rx) = oneshot::channel();

        let handle = tokio::spawn(drive(event_loop, Arc::clone(&shared), connected_tx));
        // aborts the event loop if this future is dropped before CONNACK
        let mut guard = AbortOnDrop(Some(handle));

        match connected_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(TransportError::Closed),
        }

        info!(client_id, host = %self.broker.host, port = self.broker.port, "mqtt connected");
        Ok(MqttSession {
            inner: Arc::new(SessionInner {
                client,
                shared,
                send_lock: tokio::sync::Mutex::new(()),
                event_loop: Mutex::new(guard.0.take()),
                linger: self.linger,
            }),
        })
    }
}

struct AbortOnDrop(Option<JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct AckState {
    publishes: VecDeque<Waiter>,
    subscribes: VecDeque<Waiter>,
    inflight_publishes: HashMap<u16, Waiter>,
    inflight_subscribes: HashMap<u16, Waiter>,
}

impl AckState {
    fn fail_all(&mut self) {
        let waiters = self
            .publishes
            .drain(..)
            .chain(self.subscribes.drain(..))
            .chain(self.inflight_publishes.drain().map(|(_, w)| w))
            .chain(self.inflight_subscribes.drain().map(|(_, w)| w));
        for waiter in waiters {
            let _ = waiter.send(Err(TransportError::Closed));
        }
    }
}

#[derive(Default)]
struct Shared {
    acks: Mutex<AckState>,
    subscriptions: Mutex<Vec<(String, InboundHandler)>>,
}

impl Shared {
    fn dispatch(&self, topic: &str, payload: &[u8]) {
        let handlers: Vec<InboundHandler> = lock(&self.subscriptions)
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(InboundMessage {
                topic: topic.to_owned(),
                payload: payload.to_vec(),
            });
        }
    }

    fn on_outgoing(&self, outgoing: &Outgoing) {
        let mut acks = lock(&self.acks);
        match outgoing {
            Outgoing::Publish(pkid) => {
                // retransmissions reuse an id that is already tracked
                if !acks.inflight_publishes.contains_key(pkid) {
                    if let Some(waiter) = acks.publishes.pop_front() {
                        acks.inflight_publishes.insert(*pkid, waiter);
                    }
                }
            }
            Outgoing::Subscribe(pkid) => {
                if !acks.inflight_subscribes.contains_key(pkid) {
                    if let Some(waiter) = acks.subscribes.pop_front() {
                        acks.inflight_subscribes.insert(*pkid, waiter);
                    }
                }
            }
            _ => {}
        }
    }

    fn on_incoming(&self, packet: Packet) {
        match packet {
            Packet::Publish(publish) => self.dispatch(&publish.topic, &publish.payload),
            Packet::PubComp(comp) => {
                if let Some(waiter) = lock(&self.acks).inflight_publishes.remove(&comp.pkid) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Packet::SubAck(ack) => {
                let Some(waiter) = lock(&self.acks).inflight_subscribes.remove(&ack.pkid) else {
                    return;
                };
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                let result = if rejected {
                    Err(TransportError::Subscribe {
                        topic: String::new(),
                        reason: "broker rejected subscription".to_owned(),
                    })
                } else {
                    Ok(())
                };
                let _ = waiter.send(result);
            }
            _ => {}
        }
    }
}

/// Polls the event loop until the session disconnects.
async fn drive(
    mut event_loop: EventLoop,
    shared: Arc<Shared>,
    connected_tx: oneshot::Sender<Result<(), TransportError>>,
) {
    let mut connected_tx = Some(connected_tx);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let result = if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(TransportError::Connect(format!("broker refused: {:?}", ack.code)))
                };
                match connected_tx.take() {
                    Some(tx) => {
                        let refused = result.is_err();
                        let _ = tx.send(result);
                        if refused {
                            return;
                        }
                    }
                    None => info!("mqtt reconnected"),
                }
            }
            Ok(Event::Incoming(packet)) => shared.on_incoming(packet),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("mqtt disconnect sent");
                break;
            }
            Ok(Event::Outgoing(outgoing)) => shared.on_outgoing(&outgoing),
            Err(e) => {
                if let Some(tx) = connected_tx.take() {
                    let _ = tx.send(Err(TransportError::Connect(e.to_string())));
                    return;
                }
                // connection loss after CONNACK is only logged; the next poll reconnects
                warn!(error = %e, "mqtt connection lost");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}

struct SessionInner {
    client: AsyncClient,
    shared: Arc<Shared>,
    send_lock: tokio::sync::Mutex<()>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    linger: Duration,
}

/// An open MQTT connection.
#[derive(Clone)]
pub struct MqttSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for MqttSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSession").finish_non_exhaustive()
    }
}

impl MqttSession {
    fn close(&self) {
        lock(&self.inner.shared.subscriptions).clear();
        lock(&self.inner.shared.acks).fail_all();
    }
}

impl TransportSession for MqttSession {
    async fn subscribe(&self, filter: &str, handler: InboundHandler) -> Result<(), TransportError> {
        lock(&self.inner.shared.subscriptions).push((filter.to_owned(), handler));

        let (tx, rx) = oneshot::channel();
        {
            let _send = self.inner.send_lock.lock().await;
            lock(&self.inner.shared.acks).subscribes.push_back(tx);
            if let Err(e) = self.inner.client.subscribe(filter, QoS::ExactlyOnce).await {
                lock(&self.inner.shared.acks).subscribes.pop_back();
                lock(&self.inner.shared.subscriptions).retain(|(f, _)| f != filter);
                return Err(TransportError::Subscribe {
                    topic: filter.to_owned(),
                    reason: e.to_string(),
                });
            }
        }

        let result = match rx.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Closed),
        };
        match result {
            Ok(()) => Ok(()),
            Err(TransportError::Subscribe { reason, .. }) => {
                lock(&self.inner.shared.subscriptions).retain(|(f, _)| f != filter);
                Err(TransportError::Subscribe {
                    topic: filter.to_owned(),
                    reason,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        {
            let _send = self.inner.send_lock.lock().await;
            lock(&self.inner.shared.acks).publishes.push_back(tx);
            if let Err(e) = self
                .inner
                .client
                .publish(topic, QoS::ExactlyOnce, false, payload)
                .await
            {
                lock(&self.inner.shared.acks).publishes.pop_back();
                return Err(TransportError::Publish {
                    topic: topic.to_owned(),
                    reason: e.to_string(),
                });
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Closed),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Err(e) = self.inner.client.disconnect().await {
            debug!(error = %e, "mqtt event loop already stopped");
        }

        let handle = lock(&self.inner.event_loop).take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(self.inner.linger, &mut handle).await.is_err() {
                debug!("mqtt disconnect linger elapsed, aborting event loop");
                handle.abort();
            }
        }

        self.close();
        info!("mqtt disconnected");
        Ok(())
    }
}
