//! Dispatch of inbound broker messages to device workers.
//!
//! The router runs on the network task. It never talks to a driver itself:
//! it filters echoes and replayed retained commands, authorizes the action
//! and hands it to the device's bounded queue. The worker behind the queue
//! executes one command at a time, so a command arriving while another one
//! is still retrying waits in the queue, or is answered `busy` when the
//! queue is full.
//!
//! Everything the router publishes goes through the non-blocking
//! [`BrokerClient::try_publish`]: the network task also drains the session
//! events, and waiting on the client queue from it could stall both.

use std::sync::Arc;

use lockbridge_core::constants::*;
use lockbridge_core::{Action, CommandOutcome, DeviceKind, StateQuery, TopicPath};
use lockbridge_network::{BrokerClient, DEFAULT_QOS, InboundMessage};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::access::{AccessController, Authorization};
use crate::sync::StateSynchronizer;
use crate::{BridgeError, Result};

/// Work handed to a device worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerRequest {
    Action(Action),
    Configure(Map<String, Value>),
    /// Publish the discovery registrations of the device again.
    Announce,
    /// Publish the current state again in full, after a reconnect.
    Resync,
    /// A client asked for fresh data.
    Query(StateQuery),
}

/// Routing entry of one device.
#[derive(Debug)]
pub struct DeviceRoute<B> {
    pub kind: DeviceKind,
    pub base: TopicPath,
    pub requests: mpsc::Sender<WorkerRequest>,
    pub sync: Arc<StateSynchronizer<B>>,
}

/// What the router did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Accepted into the device queue.
    Queued(Action),
    /// Answered without reaching the device.
    Rejected(CommandOutcome),
    ConfigQueued,
    /// Answered on the configuration result topic.
    ConfigRejected(&'static str),
    /// Our own acknowledgement or an empty payload.
    Echo,
    /// Arrived right after the session came up.
    Replay,
    WatermarkSeeded { index: u32, raised: bool },
    QueryQueued(StateQuery),
    /// A client asked for a gateway restart.
    RestartRequested,
    /// No device owns the topic.
    Unrouted,
}

/// Routes messages for every device of the gateway.
#[derive(Debug)]
pub struct CommandRouter<B> {
    broker: B,
    access: Arc<AccessController>,
    devices: Vec<DeviceRoute<B>>,
    /// Gateway base path, owner of the maintenance topics.
    maintenance: Option<TopicPath>,
}

impl<B: BrokerClient> CommandRouter<B> {
    pub fn new(broker: B, access: Arc<AccessController>) -> Self {
        Self {
            broker,
            access,
            devices: Vec::new(),
            maintenance: None,
        }
    }

    /// Accept restart requests on `<base>/maintenance/reset`.
    pub fn with_maintenance(mut self, base: TopicPath) -> Self {
        self.maintenance = Some(base);
        self
    }

    pub fn add_device(&mut self, route: DeviceRoute<B>) {
        info!("Routing {} commands on {}", route.kind, route.base);
        self.devices.push(route);
    }

    pub fn access(&self) -> &Arc<AccessController> {
        &self.access
    }

    /// Topic filters the gateway must subscribe to.
    pub fn subscriptions(&self) -> Result<Vec<TopicPath>> {
        let mut filters = Vec::with_capacity(self.devices.len() * 7 + 1);
        for device in &self.devices {
            filters.push(device.base.join(TOPIC_ACTION)?);
            filters.push(device.base.join(TOPIC_CONFIG_ACTION)?);
            filters.push(device.base.join(TOPIC_LOG_LAST)?);
            for query in StateQuery::ALL {
                filters.push(device.base.join(query.topic_suffix())?);
            }
        }
        if let Some(base) = &self.maintenance {
            filters.push(base.join(TOPIC_MAINTENANCE_RESET)?);
        }
        Ok(filters)
    }

    /// Subscribe to every command topic.
    ///
    /// Call once before the session starts; the session restores the
    /// subscriptions after every reconnect.
    pub async fn subscribe_all(&self) -> Result<()> {
        for filter in self.subscriptions()? {
            self.broker.subscribe(filter.as_str(), DEFAULT_QOS).await?;
        }
        Ok(())
    }

    /// Ask every worker to republish its discovery registrations.
    ///
    /// A worker whose queue is full skips this round.
    pub fn announce_all(&self) {
        for device in &self.devices {
            if let Err(e) = device.requests.try_send(WorkerRequest::Announce) {
                warn!("{}: discovery announcement skipped: {}", device.kind, e);
            }
        }
    }

    /// Ask every worker to republish its state in full.
    ///
    /// Called when the session comes back, so that snapshots missed while
    /// offline reach the broker.
    pub fn resync_all(&self) {
        for device in &self.devices {
            if let Err(e) = device.requests.try_send(WorkerRequest::Resync) {
                warn!("{}: state resync skipped: {}", device.kind, e);
            }
        }
    }

    /// Handle one inbound message.
    ///
    /// Never waits: requests go to the workers with `try_send` and replies
    /// use `try_publish`, so the session task is never blocked behind a full
    /// client queue.
    pub fn route(&self, message: &InboundMessage) -> Result<RouteOutcome> {
        if let Some(base) = &self.maintenance
            && base.matches(TOPIC_MAINTENANCE_RESET, &message.topic)
        {
            return self.route_reset(base, message);
        }
        for device in &self.devices {
            if device.base.matches(TOPIC_ACTION, &message.topic) {
                return self.route_action(device, message);
            }
            if device.base.matches(TOPIC_CONFIG_ACTION, &message.topic) {
                return self.route_config(device, message);
            }
            if device.base.matches(TOPIC_LOG_LAST, &message.topic) {
                return Ok(seed_watermark(device, message));
            }
            for query in StateQuery::ALL {
                if device.base.matches(query.topic_suffix(), &message.topic) {
                    return self.route_query(device, query, message);
                }
            }
        }
        debug!("No route for {}", message.topic);
        Ok(RouteOutcome::Unrouted)
    }

    fn route_action(
        &self,
        device: &DeviceRoute<B>,
        message: &InboundMessage,
    ) -> Result<RouteOutcome> {
        let payload = message.payload_str();
        let payload = payload.trim();
        if IGNORED_ACTION_PAYLOADS.contains(&payload) {
            return Ok(RouteOutcome::Echo);
        }
        if self.broker.connected_within(RECENT_CONNECT_WINDOW) {
            info!(
                "{}: ignoring action {:?} received right after connect",
                device.kind, payload
            );
            return Ok(RouteOutcome::Replay);
        }

        let action = match self.access.authorize(device.kind, payload) {
            Authorization::Granted(action) => action,
            Authorization::Denied(_) => return self.reject(device, CommandOutcome::Denied),
            Authorization::UnknownAction => {
                return self.reject(device, CommandOutcome::UnknownAction);
            }
        };

        match device.requests.try_send(WorkerRequest::Action(action)) {
            Ok(()) => {
                info!("{}: queued {}", device.kind, action);
                self.acknowledge(device, CommandOutcome::Accepted)?;
                Ok(RouteOutcome::Queued(action))
            }
            Err(TrySendError::Full(_)) => {
                warn!("{}: queue full, {} rejected", device.kind, action);
                self.reject(device, CommandOutcome::Busy)
            }
            Err(TrySendError::Closed(_)) => {
                Err(BridgeError::worker_stopped(device.kind.as_str()))
            }
        }
    }

    fn route_query(
        &self,
        device: &DeviceRoute<B>,
        query: StateQuery,
        message: &InboundMessage,
    ) -> Result<RouteOutcome> {
        if message.payload_str().trim() != PAYLOAD_REQUESTED {
            return Ok(RouteOutcome::Echo);
        }
        self.publish_now(&device.base.join(query.topic_suffix())?, PAYLOAD_CLEARED);

        match device.requests.try_send(WorkerRequest::Query(query)) {
            Ok(()) => {
                debug!("{}: {} query queued", device.kind, query);
                Ok(RouteOutcome::QueryQueued(query))
            }
            Err(TrySendError::Full(_)) => {
                warn!("{}: queue full, {} query dropped", device.kind, query);
                Ok(RouteOutcome::Rejected(CommandOutcome::Busy))
            }
            Err(TrySendError::Closed(_)) => {
                Err(BridgeError::worker_stopped(device.kind.as_str()))
            }
        }
    }

    fn route_reset(&self, base: &TopicPath, message: &InboundMessage) -> Result<RouteOutcome> {
        if message.payload_str().trim() != PAYLOAD_REQUESTED {
            return Ok(RouteOutcome::Echo);
        }
        if self.broker.connected_within(RECENT_CONNECT_WINDOW) {
            info!("Ignoring restart request received right after connect");
            self.publish_now(&base.join(TOPIC_MAINTENANCE_RESET)?, PAYLOAD_CLEARED);
            return Ok(RouteOutcome::Replay);
        }
        info!("Restart requested on {}", message.topic);
        // cleared first so the retained request does not restart the next boot
        self.publish_now(&base.join(TOPIC_MAINTENANCE_RESET)?, PAYLOAD_CLEARED);
        Ok(RouteOutcome::RestartRequested)
    }

    fn route_config(
        &self,
        device: &DeviceRoute<B>,
        message: &InboundMessage,
    ) -> Result<RouteOutcome> {
        if message.payload.is_empty() {
            return Ok(RouteOutcome::Echo);
        }
        let update = match serde_json::from_slice::<Value>(&message.payload) {
            Ok(Value::Object(update)) => update,
            _ => {
                warn!("{}: configuration update is not a JSON object", device.kind);
                return self.reject_config(device, "invalidJson");
            }
        };

        match device.requests.try_send(WorkerRequest::Configure(update)) {
            Ok(()) => Ok(RouteOutcome::ConfigQueued),
            Err(TrySendError::Full(_)) => self.reject_config(device, "busy"),
            Err(TrySendError::Closed(_)) => {
                Err(BridgeError::worker_stopped(device.kind.as_str()))
            }
        }
    }

    fn reject_config(&self, device: &DeviceRoute<B>, reason: &'static str) -> Result<RouteOutcome> {
        let document = json!({ "general": reason });
        self.publish_now(
            &device.base.join(TOPIC_CONFIG_RESULT)?,
            serde_json::to_vec(&document)?,
        );
        Ok(RouteOutcome::ConfigRejected(reason))
    }

    fn reject(&self, device: &DeviceRoute<B>, outcome: CommandOutcome) -> Result<RouteOutcome> {
        self.acknowledge(device, outcome)?;
        Ok(RouteOutcome::Rejected(outcome))
    }

    fn acknowledge(&self, device: &DeviceRoute<B>, outcome: CommandOutcome) -> Result<()> {
        self.publish_now(&device.base.join(TOPIC_ACTION)?, outcome.ack_payload());
        Ok(())
    }

    /// Retained publish that never waits; a failure is logged and dropped.
    fn publish_now(&self, topic: &TopicPath, payload: impl Into<bytes::Bytes>) {
        if let Err(e) = self.broker.try_publish_retained(topic, payload) {
            warn!("Could not publish to {}: {}", topic, e);
        }
    }
}

fn seed_watermark<B: BrokerClient>(
    device: &DeviceRoute<B>,
    message: &InboundMessage,
) -> RouteOutcome {
    match message.payload_str().trim().parse::<u32>() {
        Ok(index) => RouteOutcome::WatermarkSeeded {
            index,
            raised: device.sync.seed_log_watermark(index),
        },
        Err(_) => {
            debug!("{}: ignoring log watermark {:?}", device.kind, message.payload_str());
            RouteOutcome::Echo
        }
    }
}
