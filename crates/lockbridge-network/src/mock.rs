//! In-memory broker for tests.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lockbridge_core::TopicPath;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::broker::{BrokerClient, Qos};
use crate::{NetworkError, Result};

/// One recorded publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

impl Publication {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Debug)]
struct BrokerState {
    connected: bool,
    connected_at: Option<Instant>,
    queue_full: bool,
    publications: Vec<Publication>,
    subscriptions: Vec<(String, Qos)>,
}

/// [`BrokerClient`] that records every publish.
///
/// Starts connected. Clones share the same record.
#[derive(Debug, Clone)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                connected: true,
                connected_at: None,
                queue_full: false,
                publications: Vec::new(),
                subscriptions: Vec::new(),
            })),
        }
    }

    /// Connect or disconnect. Connecting starts a fresh session now.
    pub fn set_connected(&self, connected: bool) {
        let mut state = self.state.lock();
        state.connected = connected;
        state.connected_at = connected.then(Instant::now);
    }

    /// Simulate a client request queue without room: awaited publishes
    /// never complete and non-blocking ones fail.
    pub fn set_queue_full(&self, full: bool) {
        self.state.lock().queue_full = full;
    }

    /// Pretend the session has been up for a long time.
    pub fn age_session(&self) {
        self.state.lock().connected_at = None;
    }

    pub fn publications(&self) -> Vec<Publication> {
        self.state.lock().publications.clone()
    }

    pub fn publications_to(&self, topic: &str) -> Vec<Publication> {
        self.state
            .lock()
            .publications
            .iter()
            .filter(|publication| publication.topic == topic)
            .cloned()
            .collect()
    }

    /// Payload of the latest publish to `topic`.
    pub fn last_payload(&self, topic: &str) -> Option<String> {
        self.state
            .lock()
            .publications
            .iter()
            .rev()
            .find(|publication| publication.topic == topic)
            .map(Publication::payload_str)
    }

    /// What a new subscriber would receive as retained message on `topic`.
    ///
    /// A retained empty payload clears the topic, as on a real broker.
    pub fn retained(&self, topic: &str) -> Option<Bytes> {
        self.state
            .lock()
            .publications
            .iter()
            .rev()
            .find(|publication| publication.topic == topic && publication.retain)
            .map(|publication| publication.payload.clone())
            .filter(|payload| !payload.is_empty())
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state
            .lock()
            .subscriptions
            .iter()
            .map(|(filter, _)| filter.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.state.lock().publications.clear();
    }
}

impl MockBroker {
    fn record(&self, topic: &TopicPath, payload: Bytes, qos: Qos, retain: bool) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(NetworkError::NotConnected);
        }
        state.publications.push(Publication {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }
}

impl BrokerClient for MockBroker {
    async fn publish(&self, topic: &TopicPath, payload: Bytes, qos: Qos, retain: bool) -> Result<()> {
        let full = self.state.lock().queue_full;
        if full {
            std::future::pending::<()>().await;
        }
        self.record(topic, payload, qos, retain)
    }

    fn try_publish(&self, topic: &TopicPath, payload: Bytes, qos: Qos, retain: bool) -> Result<()> {
        if self.state.lock().queue_full {
            return Err(NetworkError::QueueFull);
        }
        self.record(topic, payload, qos, retain)
    }

    async fn subscribe(&self, filter: &str, qos: Qos) -> Result<()> {
        let mut state = self.state.lock();
        if !state.subscriptions.iter().any(|(existing, _)| existing == filter) {
            state.subscriptions.push((filter.to_string(), qos));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn connected_within(&self, window: Duration) -> bool {
        self.state
            .lock()
            .connected_at
            .is_some_and(|at| at.elapsed() < window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_publications() {
        let broker = MockBroker::new();
        let topic = TopicPath::new("home/lock/state").unwrap();

        broker.publish_retained(&topic, "locked").await.unwrap();
        broker.publish_retained(&topic, "unlocked").await.unwrap();

        assert_eq!(broker.publications_to("home/lock/state").len(), 2);
        assert_eq!(broker.last_payload("home/lock/state").as_deref(), Some("unlocked"));
        assert_eq!(broker.retained("home/lock/state").unwrap(), "unlocked");
    }

    #[tokio::test]
    async fn test_empty_retained_payload_clears_topic() {
        let broker = MockBroker::new();
        let topic = TopicPath::new("homeassistant/sensor/abc/keypad_0/config").unwrap();

        broker.publish_retained(&topic, "{}").await.unwrap();
        broker.publish_retained(&topic, Bytes::new()).await.unwrap();

        assert!(broker.retained(topic.as_str()).is_none());
    }

    #[tokio::test]
    async fn test_disconnected_broker_rejects_publish() {
        let broker = MockBroker::new();
        broker.set_connected(false);
        let topic = TopicPath::new("home/lock/state").unwrap();

        let err = broker.publish_retained(&topic, "locked").await.unwrap_err();
        assert!(matches!(err, NetworkError::NotConnected));
        assert!(broker.publications().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_blocks_publish_but_not_try_publish() {
        let broker = MockBroker::new();
        let topic = TopicPath::new("home/lock/action").unwrap();
        broker.set_queue_full(true);

        let blocked =
            tokio::time::timeout(Duration::from_secs(1), broker.publish_retained(&topic, "ack")).await;
        assert!(blocked.is_err());
        assert!(matches!(
            broker.try_publish_retained(&topic, "ack"),
            Err(NetworkError::QueueFull)
        ));

        broker.set_queue_full(false);
        broker.try_publish_retained(&topic, "ack").unwrap();
        assert_eq!(broker.publications_to("home/lock/action").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_session_window() {
        let broker = MockBroker::new();
        assert!(!broker.connected_within(Duration::from_secs(6)));

        broker.set_connected(true);
        assert!(broker.connected_within(Duration::from_secs(6)));

        tokio::time::advance(Duration::from_secs(7)).await;
        assert!(!broker.connected_within(Duration::from_secs(6)));
    }
}
