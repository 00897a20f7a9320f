//! Mirroring of device state onto the broker.
//!
//! The [`StateSynchronizer`] of a device owns the last published snapshot.
//! Each new snapshot is diffed field by field against it and only changed
//! fields are published, followed by the aggregate JSON document. The stored
//! snapshot is replaced only after the whole batch went out, under the same
//! lock, so readers never see a snapshot that was not published.
//!
//! A snapshot whose publish failed is kept as pending. After the session
//! comes back, [`resync`](StateSynchronizer::resync) publishes it in full,
//! so retained topics match the device again without waiting for the next
//! change.
//!
//! It also keeps the log watermark: the highest log index already handled.
//! Entries at or below it are dropped, so a re-delivered log batch publishes
//! nothing and triggers nothing twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use lockbridge_core::constants::*;
use lockbridge_core::{DeviceKind, DeviceSnapshot, LockState, LogEntry, LogEntryKind, TopicPath};
use lockbridge_network::BrokerClient;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::Result;

/// Aggregate JSON document published on `<base>/json`.
#[derive(Debug, Serialize)]
struct StateDocument<'a> {
    lock_state: &'static str,
    trigger: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_lock_action: Option<&'static str>,
    lock_completion_status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    door_sensor_state: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_name: Option<&'a str>,
}

/// Result of handling one log batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogUpdate {
    /// Entries above the watermark that were published.
    pub processed: usize,
    /// Ring notifications raised.
    pub rings: usize,
    pub watermark: u32,
}

#[derive(Debug, Default)]
struct SyncState {
    last: Option<DeviceSnapshot>,
    /// Newest snapshot that could not be published.
    pending: Option<DeviceSnapshot>,
    authorization: Option<(u32, String)>,
    ring_reset_at: Option<Instant>,
}

/// Publishes the state of one device.
#[derive(Debug)]
pub struct StateSynchronizer<B> {
    broker: B,
    kind: DeviceKind,
    base: TopicPath,
    state: Mutex<SyncState>,
    /// Kept outside `state` so seeding never waits behind a publish.
    log_watermark: AtomicU32,
    published: watch::Sender<Option<DeviceSnapshot>>,
}

impl<B: BrokerClient> StateSynchronizer<B> {
    pub fn new(broker: B, kind: DeviceKind, base: TopicPath) -> Self {
        let (published, _) = watch::channel(None);
        Self {
            broker,
            kind,
            base,
            state: Mutex::new(SyncState::default()),
            log_watermark: AtomicU32::new(0),
            published,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn base(&self) -> &TopicPath {
        &self.base
    }

    /// Receiver of every snapshot once it has been published.
    pub fn subscribe(&self) -> watch::Receiver<Option<DeviceSnapshot>> {
        self.published.subscribe()
    }

    pub async fn last_snapshot(&self) -> Option<DeviceSnapshot> {
        self.state.lock().await.last.clone()
    }

    /// Publish the fields of `snapshot` that differ from the last one.
    ///
    /// The first snapshot publishes every field. Returns the number of
    /// fields published; an identical snapshot publishes nothing.
    ///
    /// # Errors
    ///
    /// On a failed publish the stored snapshot is left as it was and
    /// `snapshot` becomes pending, so the next call or a
    /// [`resync`](Self::resync) publishes the same changes again.
    pub async fn publish(&self, snapshot: &DeviceSnapshot) -> Result<usize> {
        let mut state = self.state.lock().await;
        self.publish_locked(&mut state, snapshot, false).await
    }

    /// Publish the newest known snapshot again with every field.
    ///
    /// That is the pending one if its publish failed, otherwise the last
    /// published one. Returns the number of fields published, 0 when no
    /// snapshot has been seen yet.
    pub async fn resync(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let Some(snapshot) = state.pending.clone().or_else(|| state.last.clone()) else {
            return Ok(0);
        };
        info!("{}: republishing {} state", self.kind, snapshot.lock_state);
        self.publish_locked(&mut state, &snapshot, true).await
    }

    /// Whether a snapshot is waiting for the broker.
    pub async fn has_pending(&self) -> bool {
        self.state.lock().await.pending.is_some()
    }

    async fn publish_locked(
        &self,
        state: &mut SyncState,
        snapshot: &DeviceSnapshot,
        full: bool,
    ) -> Result<usize> {
        match self.send_fields(state, snapshot, full).await {
            Ok(published) => {
                state.last = Some(snapshot.clone());
                state.pending = None;
                self.published.send_replace(Some(snapshot.clone()));
                Ok(published)
            }
            Err(e) => {
                state.pending = Some(snapshot.clone());
                Err(e)
            }
        }
    }

    async fn send_fields(
        &self,
        state: &SyncState,
        snapshot: &DeviceSnapshot,
        full: bool,
    ) -> Result<usize> {
        let last = state.last.as_ref().filter(|_| !full);
        let previous: HashMap<&'static str, String> = last
            .map(|last| {
                last.tracked_fields()
                    .into_iter()
                    .map(|field| (field.topic, field.payload))
                    .collect()
            })
            .unwrap_or_default();
        let changed: Vec<_> = snapshot
            .tracked_fields()
            .into_iter()
            .filter(|field| previous.get(field.topic) != Some(&field.payload))
            .collect();

        if changed.is_empty() {
            return Ok(0);
        }
        for field in &changed {
            self.broker
                .publish_retained(&self.base.join(field.topic)?, field.payload.clone())
                .await?;
        }
        self.publish_document(snapshot, state.authorization.as_ref())
            .await?;

        if last.is_none_or(|last| last.battery != snapshot.battery) {
            self.broker
                .publish_retained(
                    &self.base.join(TOPIC_BATTERY_JSON)?,
                    serde_json::to_vec(&snapshot.battery)?,
                )
                .await?;
        }
        debug!(
            "{}: published {} changed fields ({})",
            self.kind,
            changed.len(),
            snapshot.lock_state
        );
        Ok(changed.len())
    }

    async fn publish_document(
        &self,
        snapshot: &DeviceSnapshot,
        authorization: Option<&(u32, String)>,
    ) -> Result<()> {
        let document = StateDocument {
            lock_state: snapshot.lock_state.as_str(),
            trigger: snapshot.trigger.as_str(),
            last_lock_action: snapshot.last_action.map(|action| action.as_str()),
            lock_completion_status: snapshot.completion_status.as_str(),
            door_sensor_state: snapshot.door_sensor_state.map(|state| state.as_str()),
            device_time: snapshot.device_time.map(|time| time.to_string()),
            auth_id: authorization.map(|(id, _)| *id),
            auth_name: authorization.map(|(_, name)| name.as_str()),
        };
        self.broker
            .publish_retained(&self.base.join(TOPIC_JSON)?, serde_json::to_vec(&document)?)
            .await?;
        Ok(())
    }

    pub fn log_watermark(&self) -> u32 {
        self.log_watermark.load(Ordering::Acquire)
    }

    /// Raise the watermark to `index`, e.g. from the retained `/log/last`.
    ///
    /// A lower or equal value is ignored. Returns whether it was raised.
    pub fn seed_log_watermark(&self, index: u32) -> bool {
        let previous = self.log_watermark.fetch_max(index, Ordering::AcqRel);
        if index > previous {
            info!("{}: log watermark seeded {} -> {}", self.kind, previous, index);
            true
        } else {
            false
        }
    }

    /// Handle a batch of log entries in any order.
    ///
    /// Entries above the watermark are published to `<base>/log` in index
    /// order and advance the watermark; doorbell recognitions on an opener
    /// raise a ring notification. The newest lock or keypad action updates
    /// the authorization topics.
    pub async fn process_log(&self, entries: &[LogEntry]) -> Result<LogUpdate> {
        let mut state = self.state.lock().await;
        let watermark = self.log_watermark();

        let mut fresh: Vec<&LogEntry> = entries
            .iter()
            .filter(|entry| entry.index > watermark)
            .collect();
        fresh.sort_by_key(|entry| entry.index);
        fresh.dedup_by_key(|entry| entry.index);

        let mut update = LogUpdate {
            watermark,
            ..LogUpdate::default()
        };
        if fresh.is_empty() {
            return Ok(update);
        }

        let log_topic = self.base.join(TOPIC_LOG)?;
        for entry in &fresh {
            self.broker
                .publish_retained(&log_topic, serde_json::to_vec(entry)?)
                .await?;

            if self.kind == DeviceKind::Opener && entry.kind == LogEntryKind::DoorbellRecognition {
                let locked = state
                    .last
                    .as_ref()
                    .is_some_and(|last| last.lock_state == LockState::Locked);
                self.publish_ring(locked).await?;
                state.ring_reset_at = Some(Instant::now() + RING_DWELL);
                update.rings += 1;
            }

            self.log_watermark.fetch_max(entry.index, Ordering::AcqRel);
            update.processed += 1;
        }
        update.watermark = self.log_watermark();
        self.broker
            .publish_retained(
                &self.base.join(TOPIC_LOG_LAST)?,
                update.watermark.to_string(),
            )
            .await?;

        let newest_authorized = fresh
            .iter()
            .rev()
            .find(|entry| entry.is_authorized_action());
        if let Some(entry) = newest_authorized {
            let authorization = (entry.auth_id, entry.auth_name.clone());
            if state.authorization.as_ref() != Some(&authorization) {
                self.broker
                    .publish_retained(
                        &self.base.join(TOPIC_AUTHORIZATION_ID)?,
                        authorization.0.to_string(),
                    )
                    .await?;
                self.broker
                    .publish_retained(
                        &self.base.join(TOPIC_AUTHORIZATION_NAME)?,
                        authorization.1.clone(),
                    )
                    .await?;
                if let Some(last) = &state.last {
                    self.publish_document(last, Some(&authorization)).await?;
                }
                state.authorization = Some(authorization);
            }
        }

        debug!(
            "{}: processed {} log entries, watermark {}",
            self.kind, update.processed, update.watermark
        );
        Ok(update)
    }

    async fn publish_ring(&self, locked: bool) -> Result<()> {
        let payload = if locked { PAYLOAD_RING_LOCKED } else { PAYLOAD_RING };
        info!("{}: ring detected ({})", self.kind, payload);
        self.broker
            .publish_retained(&self.base.join(TOPIC_RING)?, Bytes::from(payload))
            .await?;
        self.broker
            .publish_retained(&self.base.join(TOPIC_BINARY_RING)?, Bytes::from(PAYLOAD_RING))
            .await?;
        Ok(())
    }

    /// When the binary ring topic is due to return to standby.
    pub async fn ring_reset_at(&self) -> Option<Instant> {
        self.state.lock().await.ring_reset_at
    }

    /// Return the binary ring topic to standby once the dwell time is over.
    ///
    /// Returns whether standby was published.
    pub async fn reset_ring(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.ring_reset_at {
            Some(at) if at <= Instant::now() => {
                state.ring_reset_at = None;
                if let Err(e) = self
                    .broker
                    .publish_retained(&self.base.join(TOPIC_BINARY_RING)?, Bytes::from(PAYLOAD_STANDBY))
                    .await
                {
                    warn!("{}: failed to reset ring state: {}", self.kind, e);
                    return Err(e.into());
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
