//! The per-device task.
//!
//! A [`DeviceWorker`] owns the driver of one lock or opener. It is the only
//! place that calls into the driver, and it handles one request at a time,
//! so commands on one device never overlap. Requests come from the
//! [`CommandRouter`](crate::router::CommandRouter) through a bounded queue;
//! driver events are mirrored onto the broker as they arrive.
//!
//! With a [`Heartbeat`] attached, the worker beats it on every loop turn and
//! at least every [`HEARTBEAT_INTERVAL`] while idle. A driver call that never
//! returns stops the beats.

use std::sync::Arc;

use bytes::Bytes;

use lockbridge_core::constants::*;
use lockbridge_core::{
    Action, CmdResult, CommandOutcome, DeviceKind, DynamicEntry, StateQuery, TopicPath,
};
use lockbridge_hardware::traits::{DriverEvent, LockDriver};
use lockbridge_network::BrokerClient;
use lockbridge_storage::PreferenceStore;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::access::{AccessController, ConfigMode, FieldDecision};
use crate::discovery::DiscoveryContext;
use crate::entities::EntityLifecycleManager;
use crate::heartbeat::{HEARTBEAT_INTERVAL, Heartbeat};
use crate::retry::{RetryExecutor, SendAction, WriteConfig};
use crate::router::{DeviceRoute, WorkerRequest};
use crate::sync::StateSynchronizer;
use crate::{BridgeError, Result};

/// Default capacity of the request queue of one device.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// Settings of one device worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Topic path all topics of the device live under.
    pub base: TopicPath,
    /// Requests waiting beyond this are answered `busy`.
    pub queue_capacity: usize,
    /// Discovery prefix; `None` disables discovery.
    pub discovery_root: Option<TopicPath>,
    /// Stable identifier used in discovery registrations.
    pub unique_id: String,
}

impl WorkerConfig {
    pub fn new(base: TopicPath, unique_id: impl Into<String>) -> Self {
        Self {
            base,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            discovery_root: None,
            unique_id: unique_id.into(),
        }
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn discovery_root(mut self, root: TopicPath) -> Self {
        self.discovery_root = Some(root);
        self
    }
}

/// Drives one device.
pub struct DeviceWorker<D, B> {
    driver: D,
    broker: B,
    kind: DeviceKind,
    base: TopicPath,
    requests: mpsc::Receiver<WorkerRequest>,
    sync: Arc<StateSynchronizer<B>>,
    access: Arc<AccessController>,
    executor: RetryExecutor,
    entities: EntityLifecycleManager,
    preferences: Option<PreferenceStore>,
    heartbeat: Option<Heartbeat>,
}

impl<D, B> std::fmt::Debug for DeviceWorker<D, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceWorker")
            .field("kind", &self.kind)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl<D, B> DeviceWorker<D, B>
where
    D: LockDriver,
    B: BrokerClient + Clone,
{
    /// Create the worker and the route the router uses to reach it.
    pub fn new(
        driver: D,
        broker: B,
        access: Arc<AccessController>,
        executor: RetryExecutor,
        config: WorkerConfig,
    ) -> (Self, DeviceRoute<B>) {
        let kind = driver.kind();
        let discovery = config.discovery_root.map(|root| {
            DiscoveryContext::new(
                root,
                config.base.clone(),
                config.unique_id,
                kind,
                &driver.info(),
            )
        });
        let sync = Arc::new(StateSynchronizer::new(
            broker.clone(),
            kind,
            config.base.clone(),
        ));
        let (tx, requests) = mpsc::channel(config.queue_capacity);

        let route = DeviceRoute {
            kind,
            base: config.base.clone(),
            requests: tx,
            sync: Arc::clone(&sync),
        };
        let worker = Self {
            driver,
            broker,
            kind,
            entities: EntityLifecycleManager::new(config.base.clone(), discovery),
            base: config.base,
            requests,
            sync,
            access,
            executor,
            preferences: None,
            heartbeat: None,
        };
        (worker, route)
    }

    /// Persist published list lengths in `preferences`.
    pub fn with_preferences(mut self, preferences: PreferenceStore) -> Self {
        self.preferences = Some(preferences);
        self
    }

    /// Report progress to a watchdog feeder.
    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn synchronizer(&self) -> &Arc<StateSynchronizer<B>> {
        &self.sync
    }

    /// Load the list lengths published before the last restart, so that
    /// entries dropped in the meantime are still cleared.
    pub async fn restore_entity_counts(&mut self) -> Result<()> {
        let Some(preferences) = &self.preferences else {
            return Ok(());
        };
        for list in lockbridge_core::DynamicList::ALL {
            let count = preferences.max_entries(self.kind, list).await?;
            if count > 0 {
                debug!("{}: restoring {} {} entries", self.kind, count, list);
                self.entities.restore(list, count);
            }
        }
        Ok(())
    }

    /// Run until the request queue closes or the driver disconnects.
    ///
    /// # Errors
    ///
    /// Returns the driver error when the driver shuts down. Publish failures
    /// are logged and do not end the loop.
    pub async fn run(mut self) -> Result<()> {
        info!("{} worker started on {}", self.kind, self.base);
        self.announce().await;
        let mut idle = tokio::time::interval(HEARTBEAT_INTERVAL);
        idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if let Some(heartbeat) = &self.heartbeat {
                heartbeat.beat();
            }
            let ring_reset_at = self.sync.ring_reset_at().await;

            tokio::select! {
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        info!("{} worker stopping: request queue closed", self.kind);
                        return Ok(());
                    };
                    self.handle_request(request).await;
                }
                event = self.driver.next_event() => {
                    match event {
                        Ok(event) => self.handle_event(event).await,
                        Err(e) => {
                            error!("{} driver stopped: {}", self.kind, e);
                            self.publish_offline().await;
                            return Err(e.into());
                        }
                    }
                }
                () = wait_until(ring_reset_at) => {
                    if let Err(e) = self.sync.reset_ring().await {
                        warn!("{}: ring reset failed: {}", self.kind, e);
                    }
                }
                _ = idle.tick() => {}
            }
        }
    }

    async fn handle_request(&mut self, request: WorkerRequest) {
        let result = match request {
            WorkerRequest::Action(action) => self.execute_action(action).await.map(|_| ()),
            WorkerRequest::Configure(update) => self.apply_config(update).await,
            WorkerRequest::Announce => {
                self.announce().await;
                Ok(())
            }
            WorkerRequest::Resync => self.sync.resync().await.map(|_| ()),
            WorkerRequest::Query(query) => self.query(query).await,
        };
        if let Err(e) = result {
            warn!("{}: request failed: {}", self.kind, e);
        }
    }

    /// Answer a client query: republish what is known, then ask the device
    /// for fresh data, which arrives as driver events.
    pub async fn query(&mut self, query: StateQuery) -> Result<()> {
        if query.is_snapshot() {
            self.sync.resync().await?;
        }
        let result = self.driver.request_update(query).await;
        if result.is_success() {
            debug!("{}: {} update requested", self.kind, query);
        } else {
            warn!("{}: {} update request failed: {}", self.kind, query, result);
        }
        Ok(())
    }

    /// Run `action` with retries and publish the driver's result.
    pub async fn execute_action(&mut self, action: Action) -> Result<CmdResult> {
        let result = if self.driver.is_paired() {
            self.executor
                .run(SendAction {
                    driver: &mut self.driver,
                    action,
                })
                .await
        } else {
            warn!("{}: not paired, {} not sent", self.kind, action);
            CmdResult::NotPaired
        };
        info!("{}: {} -> {}", self.kind, action, result);

        self.broker
            .publish_retained(&self.base.join(TOPIC_COMMAND_RESULT)?, Bytes::from(result.as_str()))
            .await?;
        if !result.is_success() {
            self.broker
                .publish_retained(
                    &self.base.join(TOPIC_ACTION)?,
                    Bytes::from(CommandOutcome::Failed.ack_payload()),
                )
                .await?;
        }
        Ok(result)
    }

    /// Write the permitted fields of `update` and publish the per-field
    /// results.
    pub async fn apply_config(&mut self, update: Map<String, Value>) -> Result<()> {
        let topic = self.base.join(TOPIC_CONFIG_RESULT)?;

        let mode = self
            .access
            .config_mode(self.driver.has_credential_configured());
        if mode == ConfigMode::NoCredential {
            warn!("{}: configuration refused, no credential set", self.kind);
            let document = json!({ "general": "noValidPinSet" });
            self.broker
                .publish_retained(&topic, serde_json::to_vec(&document)?)
                .await?;
            return Ok(());
        }

        let mut results = Map::new();
        for (name, decision) in self.access.review_config_update(self.kind, &update) {
            let outcome = match &decision {
                FieldDecision::Allowed { field, value } => {
                    self.executor
                        .run(WriteConfig {
                            driver: &mut self.driver,
                            field: field.name,
                            value,
                        })
                        .await
                        .as_str()
                }
                rejected => rejected.rejection().unwrap_or("denied"),
            };
            debug!("{}: configuration {} -> {}", self.kind, name, outcome);
            results.insert(name, Value::from(outcome));
        }

        self.broker
            .publish_retained(&topic, serde_json::to_vec(&Value::Object(results))?)
            .await?;
        Ok(())
    }

    async fn handle_event(&mut self, event: DriverEvent) {
        let result = match event {
            DriverEvent::StateChanged(snapshot) => self.sync.publish(&snapshot).await.map(|_| ()),
            DriverEvent::LogEntries(entries) => self.sync.process_log(&entries).await.map(|_| ()),
            DriverEvent::KeypadCodes(codes) => self.sync_list(&codes).await,
            DriverEvent::TimeControl(entries) => self.sync_list(&entries).await,
            DriverEvent::Authorizations(entries) => self.sync_list(&entries).await,
        };
        if let Err(e) = result {
            warn!("{}: failed to mirror driver event: {}", self.kind, e);
        }
    }

    async fn sync_list<E: DynamicEntry + Sync>(&mut self, entries: &[E]) -> Result<()> {
        let change = self.entities.sync_list(&self.broker, entries).await?;
        if change.len_changed()
            && let Some(preferences) = &self.preferences
        {
            preferences
                .set_max_entries(self.kind, E::LIST, change.len)
                .await?;
        }
        Ok(())
    }

    async fn announce(&self) {
        if let Err(e) = self.entities.announce_device(&self.broker).await {
            warn!("{}: discovery announcement failed: {}", self.kind, e);
        }
    }

    async fn publish_offline(&self) {
        let published = match self.base.join(TOPIC_AVAILABILITY) {
            Ok(topic) => self
                .broker
                .publish_retained(&topic, Bytes::from(PAYLOAD_OFFLINE))
                .await
                .map_err(BridgeError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = published {
            debug!("{}: could not publish offline: {}", self.kind, e);
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
