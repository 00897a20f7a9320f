//! Home-automation discovery registrations.
//!
//! A registration is a retained JSON document on
//! `<discovery root>/<component>/<uid>/<object id>/config` that makes the hub
//! create an entity. Publishing an empty retained payload to the same topic
//! removes the entity again.
//!
//! # Example
//!
//! ```json
//! // Topic: homeassistant/sensor/3f2a91/keypad_0/config
//! {
//!   "name": "Keypad code Alice",
//!   "unique_id": "3f2a91_keypad_0",
//!   "state_topic": "lockbridge/lock/keypad/codes/0",
//!   "json_attributes_topic": "lockbridge/lock/keypad/codes/0",
//!   "value_template": "{{ value_json.enabled }}",
//!   "availability_topic": "lockbridge/lock/availability",
//!   "device": { "identifiers": ["3f2a91"], "name": "Front door", ... }
//! }
//! ```

use bytes::Bytes;
use lockbridge_core::constants::*;
use lockbridge_core::{DeviceKind, DynamicList, TopicPath};
use lockbridge_hardware::types::DeviceInfo;
use serde::Serialize;

use crate::Result;

const MANUFACTURER: &str = "lockbridge";

/// Discovery configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryConfig {
    pub name: String,
    pub unique_id: String,
    pub state_topic: String,
    pub availability_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_attributes_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
    #[serde(flatten)]
    pub lock: Option<LockPayloads>,
    pub device: DiscoveryDevice,
}

/// Command and state payloads of a `lock` entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockPayloads {
    pub payload_lock: &'static str,
    pub payload_unlock: &'static str,
    pub payload_open: &'static str,
    pub state_locked: &'static str,
    pub state_locking: &'static str,
    pub state_unlocked: &'static str,
    pub state_unlocking: &'static str,
    pub state_jammed: &'static str,
}

impl LockPayloads {
    fn for_kind(kind: DeviceKind) -> Self {
        let (lock, unlock, open) = match kind {
            DeviceKind::Lock => ("lock", "unlock", "unlatch"),
            DeviceKind::Opener => ("deactivateRTO", "activateRTO", "electricStrikeActuation"),
        };
        Self {
            payload_lock: lock,
            payload_unlock: unlock,
            payload_open: open,
            state_locked: "locked",
            state_locking: "locking",
            state_unlocked: "unlocked",
            state_unlocking: "unlocking",
            state_jammed: "jammed",
        }
    }
}

/// Device block shared by every entity of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryDevice {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
}

/// A discovery document together with its topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub topic: TopicPath,
    pub config: DiscoveryConfig,
}

impl Registration {
    pub fn payload(&self) -> Result<Bytes> {
        Ok(serde_json::to_vec(&self.config)?.into())
    }
}

/// Everything needed to register the entities of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryContext {
    root: TopicPath,
    base: TopicPath,
    uid: String,
    kind: DeviceKind,
    device: DiscoveryDevice,
}

impl DiscoveryContext {
    /// `root` is the discovery prefix, `base` the device's topic path and
    /// `uid` a stable identifier of the device.
    pub fn new(
        root: TopicPath,
        base: TopicPath,
        uid: impl Into<String>,
        kind: DeviceKind,
        info: &DeviceInfo,
    ) -> Self {
        let uid = uid.into();
        Self {
            device: DiscoveryDevice {
                identifiers: vec![uid.clone()],
                name: info.name.clone(),
                manufacturer: MANUFACTURER.to_string(),
                model: info.model.clone(),
                sw_version: info.firmware_version.clone(),
            },
            root,
            base,
            uid,
            kind,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// `<root>/<component>/<uid>/<object_id>/config`
    pub fn config_topic(&self, component: &str, object_id: &str) -> Result<TopicPath> {
        Ok(self
            .root
            .join(component)?
            .join(&self.uid)?
            .join(object_id)?
            .join("config")?)
    }

    /// Object id of entry `index` of `list`, e.g. `keypad_3`.
    pub fn entry_object_id(list: DynamicList, index: usize) -> String {
        format!("{}_{}", list.object_prefix(), index)
    }

    /// Topic of the registration of entry `index` of `list`.
    pub fn entry_topic(&self, list: DynamicList, index: usize) -> Result<TopicPath> {
        self.config_topic("sensor", &Self::entry_object_id(list, index))
    }

    /// Registration of one dynamic list entry.
    pub fn entry(&self, list: DynamicList, index: usize, name: String) -> Result<Registration> {
        let object_id = Self::entry_object_id(list, index);
        let state_topic = self.base.indexed(list.topic_suffix(), index)?.to_string();
        let icon = match list {
            DynamicList::KeypadCodes => "mdi:dialpad",
            DynamicList::TimeControl => "mdi:clock-outline",
            DynamicList::Authorizations => "mdi:account-key",
        };

        let mut config = self.base_config(name, &object_id, state_topic.clone())?;
        config.json_attributes_topic = Some(state_topic);
        config.value_template = Some("{{ value_json.enabled }}".to_string());
        config.icon = Some(icon.to_string());

        Ok(Registration {
            topic: self.config_topic("sensor", &object_id)?,
            config,
        })
    }

    /// Registrations of the fixed entities of the device: the lock itself,
    /// its battery and, for openers, the doorbell.
    pub fn device_entities(&self) -> Result<Vec<Registration>> {
        let object_id = self.kind.as_str();
        let mut lock = self.base_config(
            self.device.name.clone(),
            object_id,
            self.topic(TOPIC_HA_STATE)?,
        )?;
        lock.command_topic = Some(self.topic(TOPIC_ACTION)?);
        lock.json_attributes_topic = Some(self.topic(TOPIC_JSON)?);
        lock.lock = Some(LockPayloads::for_kind(self.kind));

        let mut battery = self.base_config(
            format!("{} battery low", self.device.name),
            "battery_low",
            self.topic(TOPIC_BATTERY_CRITICAL)?,
        )?;
        battery.device_class = Some("battery".to_string());
        battery.payload_on = Some("1".to_string());
        battery.payload_off = Some("0".to_string());

        let mut registrations = vec![
            Registration {
                topic: self.config_topic("lock", object_id)?,
                config: lock,
            },
            Registration {
                topic: self.config_topic("binary_sensor", "battery_low")?,
                config: battery,
            },
        ];

        if self.kind == DeviceKind::Opener {
            let mut ring = self.base_config(
                format!("{} ring", self.device.name),
                "ring",
                self.topic(TOPIC_BINARY_RING)?,
            )?;
            ring.device_class = Some("sound".to_string());
            ring.payload_on = Some(PAYLOAD_RING.to_string());
            ring.payload_off = Some(PAYLOAD_STANDBY.to_string());
            registrations.push(Registration {
                topic: self.config_topic("binary_sensor", "ring")?,
                config: ring,
            });
        }

        Ok(registrations)
    }

    fn topic(&self, suffix: &str) -> Result<String> {
        Ok(self.base.join(suffix)?.to_string())
    }

    fn base_config(
        &self,
        name: String,
        object_id: &str,
        state_topic: String,
    ) -> Result<DiscoveryConfig> {
        Ok(DiscoveryConfig {
            name,
            unique_id: format!("{}_{}", self.uid, object_id),
            state_topic,
            availability_topic: self.topic(TOPIC_AVAILABILITY)?,
            command_topic: None,
            json_attributes_topic: None,
            value_template: None,
            device_class: None,
            icon: None,
            payload_on: None,
            payload_off: None,
            lock: None,
            device: self.device.clone(),
        })
    }
}
