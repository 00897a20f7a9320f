//! Broker client contract.
//!
//! The bridge publishes through [`BrokerClient`] and never touches the MQTT
//! library directly, so the same code runs against [`MqttBroker`] in
//! production and [`MockBroker`] in tests.
//!
//! [`MqttBroker`]: crate::mqtt::MqttBroker
//! [`MockBroker`]: crate::mock::MockBroker

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use lockbridge_core::TopicPath;
use serde::{Deserialize, Serialize};

use crate::Result;

/// MQTT quality of service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// QoS used for every publish and subscription of the gateway.
pub const DEFAULT_QOS: Qos = Qos::AtLeastOnce;

impl Default for Qos {
    fn default() -> Self {
        DEFAULT_QOS
    }
}

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<rumqttc::QoS> for Qos {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => Qos::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => Qos::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => Qos::ExactlyOnce,
        }
    }
}

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Set when the broker delivered a retained message on subscribe.
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }

    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }

    /// Payload as text, with invalid UTF-8 replaced.
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Publish/subscribe side of a broker session.
///
/// Incoming messages are not delivered through this trait; the session owner
/// hands them out as [`SessionEvent`](crate::mqtt::SessionEvent)s.
pub trait BrokerClient: Send + Sync {
    /// Publish `payload` to `topic`.
    ///
    /// # Errors
    ///
    /// [`NetworkError::NotConnected`](crate::NetworkError::NotConnected) when
    /// there is no session; the publish is not queued.
    fn publish(
        &self,
        topic: &TopicPath,
        payload: Bytes,
        qos: Qos,
        retain: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Queue a publish without waiting for room in the request queue.
    ///
    /// Code running on the task that consumes the session events must use
    /// this: the queue is drained by the session loop, which may itself be
    /// waiting for that task.
    ///
    /// # Errors
    ///
    /// [`NetworkError::NotConnected`](crate::NetworkError::NotConnected)
    /// without a session, or a queue error when the queue is full.
    fn try_publish(&self, topic: &TopicPath, payload: Bytes, qos: Qos, retain: bool) -> Result<()>;

    /// Subscribe to `filter`. Subscriptions survive reconnects.
    fn subscribe(&self, filter: &str, qos: Qos) -> impl Future<Output = Result<()>> + Send;

    fn is_connected(&self) -> bool;

    /// Whether the current session was established less than `window` ago.
    fn connected_within(&self, window: Duration) -> bool;

    /// Retained publish with the default QoS.
    fn publish_retained(
        &self,
        topic: &TopicPath,
        payload: impl Into<Bytes>,
    ) -> impl Future<Output = Result<()>> + Send {
        self.publish(topic, payload.into(), DEFAULT_QOS, true)
    }

    /// Non-blocking retained publish with the default QoS.
    fn try_publish_retained(&self, topic: &TopicPath, payload: impl Into<Bytes>) -> Result<()> {
        self.try_publish(topic, payload.into(), DEFAULT_QOS, true)
    }
}
