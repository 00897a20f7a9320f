//! rumqttc-backed broker session.
//!
//! [`connect`] splits a session into a cloneable [`MqttBroker`] used by every
//! task to publish and an [`MqttSession`] that owns the event loop. The
//! session must be polled by exactly one task through [`MqttSession::run`];
//! it reconnects on its own and reports what happened as [`SessionEvent`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use lockbridge_core::TopicPath;
use lockbridge_core::constants::{MAX_MQTT_RECONNECTS, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broker::{BrokerClient, DEFAULT_QOS, InboundMessage, Qos};
use crate::{NetworkError, Result};

/// Capacity of the client request queue.
const REQUEST_CAPACITY: usize = 64;

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// A random suffix is appended so two gateways never share an id.
    pub client_id_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub reconnect_delay: Duration,
    /// Consecutive failed connects before the transport is cycled.
    pub reconnect_budget: u32,
    /// Receives `online` on connect and `offline` as the last will.
    pub availability_topic: Option<TopicPath>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id_prefix: "lockbridge".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(15),
            clean_session: true,
            reconnect_delay: Duration::from_secs(5),
            reconnect_budget: MAX_MQTT_RECONNECTS,
            availability_topic: None,
        }
    }
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn client_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.client_id_prefix = prefix.into();
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn reconnect_budget(mut self, budget: u32) -> Self {
        self.reconnect_budget = budget;
        self
    }

    pub fn availability_topic(mut self, topic: TopicPath) -> Self {
        self.availability_topic = Some(topic);
        self
    }

    /// Build the rumqttc options, including the last will.
    pub fn to_options(&self) -> MqttOptions {
        let client_id = format!("{}_{}", self.client_id_prefix, uuid::Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(self.clean_session);

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username, password);
        }

        if let Some(topic) = &self.availability_topic {
            options.set_last_will(LastWill::new(
                topic.as_str(),
                PAYLOAD_OFFLINE,
                DEFAULT_QOS.into(),
                true,
            ));
        }
        options
    }
}

/// What the session loop observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Message(InboundMessage),
    /// The configured number of connects failed in a row.
    ReconnectBudgetExhausted,
}

#[derive(Debug, Default)]
struct SessionState {
    connected: AtomicBool,
    connected_at: Mutex<Option<Instant>>,
    subscriptions: Mutex<Vec<(String, Qos)>>,
}

impl SessionState {
    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        *self.connected_at.lock() = connected.then(Instant::now);
    }
}

/// Publishing handle of a broker session.
#[derive(Debug, Clone)]
pub struct MqttBroker {
    client: AsyncClient,
    state: Arc<SessionState>,
}

impl BrokerClient for MqttBroker {
    async fn publish(&self, topic: &TopicPath, payload: Bytes, qos: Qos, retain: bool) -> Result<()> {
        if !self.is_connected() {
            return Err(NetworkError::NotConnected);
        }
        self.client
            .publish_bytes(topic.as_str(), qos.into(), retain, payload)
            .await?;
        Ok(())
    }

    fn try_publish(&self, topic: &TopicPath, payload: Bytes, qos: Qos, retain: bool) -> Result<()> {
        if !self.is_connected() {
            return Err(NetworkError::NotConnected);
        }
        self.client
            .try_publish(topic.as_str(), qos.into(), retain, payload.to_vec())?;
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: Qos) -> Result<()> {
        {
            let mut subscriptions = self.state.subscriptions.lock();
            if !subscriptions.iter().any(|(existing, _)| existing == filter) {
                subscriptions.push((filter.to_string(), qos));
            }
        }
        // otherwise the next ConnAck subscribes
        if self.is_connected() {
            self.client.subscribe(filter, qos.into()).await?;
        }
        debug!("Subscribed to {}", filter);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn connected_within(&self, window: Duration) -> bool {
        self.state
            .connected_at
            .lock()
            .is_some_and(|at| at.elapsed() < window)
    }
}

/// Event loop half of a broker session.
pub struct MqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
    state: Arc<SessionState>,
    config: MqttConfig,
    failures: u32,
}

/// Create a session. Nothing goes on the wire until [`MqttSession::run`].
pub fn connect(config: MqttConfig) -> (MqttBroker, MqttSession) {
    let (client, eventloop) = AsyncClient::new(config.to_options(), REQUEST_CAPACITY);
    let state = Arc::new(SessionState::default());
    let broker = MqttBroker {
        client: client.clone(),
        state: Arc::clone(&state),
    };
    let session = MqttSession {
        client,
        eventloop,
        state,
        config,
        failures: 0,
    };
    (broker, session)
}

impl MqttSession {
    /// Poll the connection until `events` is closed.
    pub async fn run(mut self, events: mpsc::Sender<SessionEvent>) {
        info!(
            "Connecting to broker at {}:{}",
            self.config.host, self.config.port
        );
        while !events.is_closed() {
            let Some(event) = self.poll_once().await else {
                continue;
            };
            if events.send(event).await.is_err() {
                break;
            }
        }
        self.state.set_connected(false);
        debug!("Broker session stopped");
    }

    async fn poll_once(&mut self) -> Option<SessionEvent> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to broker {}", self.config.host);
                self.failures = 0;
                self.state.set_connected(true);
                self.on_connected();
                Some(SessionEvent::Connected)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                Some(SessionEvent::Message(InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                    retain: publish.retain,
                }))
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the session");
                self.state.set_connected(false);
                Some(SessionEvent::Disconnected)
            }
            Ok(_) => None,
            Err(e) => {
                let was_connected = self.state.connected.load(Ordering::SeqCst);
                self.state.set_connected(false);
                self.failures += 1;
                warn!(
                    "Broker connection error ({} of {}): {}",
                    self.failures, self.config.reconnect_budget, e
                );
                tokio::time::sleep(self.config.reconnect_delay).await;

                if self.failures >= self.config.reconnect_budget {
                    self.failures = 0;
                    Some(SessionEvent::ReconnectBudgetExhausted)
                } else if was_connected {
                    Some(SessionEvent::Disconnected)
                } else {
                    None
                }
            }
        }
    }

    /// Restore subscriptions and announce availability.
    ///
    /// Uses the non-blocking client calls: awaiting a full request queue here
    /// would stall the loop that drains it.
    fn on_connected(&self) {
        let subscriptions = self.state.subscriptions.lock().clone();
        for (filter, qos) in subscriptions {
            if let Err(e) = self.client.try_subscribe(filter.as_str(), qos.into()) {
                warn!("Failed to resubscribe to {}: {}", filter, e);
            }
        }
        if let Some(topic) = &self.config.availability_topic
            && let Err(e) =
                self.client
                    .try_publish(topic.as_str(), DEFAULT_QOS.into(), true, PAYLOAD_ONLINE)
        {
            warn!("Failed to publish availability: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_carry_last_will() {
        let topic = TopicPath::new("home/lock/availability").unwrap();
        let config = MqttConfig::new("broker.local", 1884)
            .credentials("user", "secret")
            .keep_alive(Duration::from_secs(30))
            .availability_topic(topic);

        let options = config.to_options();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(options.client_id().starts_with("lockbridge_"));

        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "home/lock/availability");
        assert_eq!(&will.message[..], b"offline");
        assert!(will.retain);
    }

    #[test]
    fn test_client_ids_are_unique() {
        let config = MqttConfig::default();
        assert_ne!(config.to_options().client_id(), config.to_options().client_id());
    }

    #[tokio::test]
    async fn test_publish_before_connack_is_rejected() {
        let (broker, _session) = connect(MqttConfig::default());
        let topic = TopicPath::new("home/lock/state").unwrap();

        assert!(!broker.is_connected());
        assert!(!broker.connected_within(Duration::from_secs(6)));
        let err = broker
            .publish(&topic, Bytes::from_static(b"locked"), Qos::AtLeastOnce, true)
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::NotConnected));
    }

    #[test]
    fn test_try_publish_before_connack_is_rejected() {
        let (broker, _session) = connect(MqttConfig::default());
        let topic = TopicPath::new("home/lock/action").unwrap();

        let err = broker.try_publish_retained(&topic, "ack").unwrap_err();
        assert!(matches!(err, NetworkError::NotConnected));
    }

    #[tokio::test]
    async fn test_subscribe_while_offline_is_remembered() {
        let (broker, _session) = connect(MqttConfig::default());
        broker.subscribe("home/lock/action", Qos::AtLeastOnce).await.unwrap();
        broker.subscribe("home/lock/action", Qos::AtLeastOnce).await.unwrap();

        assert_eq!(broker.state.subscriptions.lock().len(), 1);
    }
}
