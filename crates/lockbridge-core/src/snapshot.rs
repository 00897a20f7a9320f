//! Device state readings and the entries a device reports.
//!
//! A [`DeviceSnapshot`] is one immutable reading. Its tracked fields are
//! exposed as `(topic suffix, payload)` pairs so that publishing and diffing
//! never need to know the individual field types.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::types::{Action, DeviceKind, DynamicList};

/// Lock position or opener mode as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockState {
    Uncalibrated,
    Locked,
    Unlocking,
    Unlocked,
    Locking,
    Unlatched,
    UnlockedLockNgo,
    Unlatching,
    Calibration,
    BootRun,
    MotorBlocked,
    /// Opener ring-to-open window is active.
    RtoActive,
    /// Opener continuous mode.
    ContinuousMode,
    Open,
    Opening,
    Undefined,
}

impl LockState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uncalibrated => "uncalibrated",
            Self::Locked => "locked",
            Self::Unlocking => "unlocking",
            Self::Unlocked => "unlocked",
            Self::Locking => "locking",
            Self::Unlatched => "unlatched",
            Self::UnlockedLockNgo => "unlockedLnga",
            Self::Unlatching => "unlatching",
            Self::Calibration => "calibration",
            Self::BootRun => "bootRun",
            Self::MotorBlocked => "motorBlocked",
            Self::RtoActive => "rtoActive",
            Self::ContinuousMode => "continuousMode",
            Self::Open => "open",
            Self::Opening => "opening",
            Self::Undefined => "undefined",
        }
    }

    /// Home-automation lock state and binary state for this state.
    ///
    /// Returns `None` for [`LockState::Undefined`]. Fault states map to
    /// `jammed` without a binary state.
    pub fn home_automation_state(self) -> Option<(&'static str, Option<&'static str>)> {
        let mapped = match self {
            Self::Locked => ("locked", Some("locked")),
            Self::Locking => ("locking", Some("locked")),
            Self::Unlocking => ("unlocking", Some("unlocked")),
            Self::Unlocked | Self::UnlockedLockNgo | Self::RtoActive | Self::ContinuousMode => {
                ("unlocked", Some("unlocked"))
            }
            Self::Unlatched | Self::Open => ("open", Some("unlocked")),
            Self::Unlatching | Self::Opening => ("opening", Some("unlocked")),
            Self::Uncalibrated | Self::Calibration | Self::BootRun | Self::MotorBlocked => {
                ("jammed", None)
            }
            Self::Undefined => return None,
        };
        Some(mapped)
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused the last state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    System,
    Manual,
    Button,
    Automatic,
    AutoLock,
    Undefined,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Manual => "manual",
            Self::Button => "button",
            Self::Automatic => "automatic",
            Self::AutoLock => "autoLock",
            Self::Undefined => "undefined",
        }
    }
}

/// Outcome of the last physical action, as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionStatus {
    Success,
    MotorBlocked,
    Canceled,
    TooRecent,
    Busy,
    LowMotorVoltage,
    ClutchFailure,
    MotorPowerFailure,
    IncompleteFailure,
    OtherError,
    Unknown,
}

impl CompletionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::MotorBlocked => "motorBlocked",
            Self::Canceled => "canceled",
            Self::TooRecent => "tooRecent",
            Self::Busy => "busy",
            Self::LowMotorVoltage => "lowMotorVoltage",
            Self::ClutchFailure => "clutchFailure",
            Self::MotorPowerFailure => "motorPowerFailure",
            Self::IncompleteFailure => "incompleteFailure",
            Self::OtherError => "otherError",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DoorSensorState {
    Unavailable,
    Deactivated,
    DoorClosed,
    DoorOpened,
    DoorStateUnknown,
    Calibrating,
}

impl DoorSensorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Deactivated => "deactivated",
            Self::DoorClosed => "doorClosed",
            Self::DoorOpened => "doorOpened",
            Self::DoorStateUnknown => "doorStateUnknown",
            Self::Calibrating => "calibrating",
        }
    }
}

/// Sentinel accessory byte meaning "no accessory battery information".
const NO_ACCESSORY: u8 = 255;

/// Decoded battery flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryReport {
    pub critical: bool,
    pub charging: bool,
    /// Charge in percent.
    pub level: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keypad_critical: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub door_sensor_critical: Option<bool>,
}

impl BatteryReport {
    /// Decode the device's packed battery byte and accessory battery byte.
    ///
    /// ```
    /// use lockbridge_core::BatteryReport;
    ///
    /// let report = BatteryReport::from_raw(0b1100_1001, 255);
    /// assert!(report.critical);
    /// assert!(!report.charging);
    /// assert_eq!(report.level, 100);
    /// assert_eq!(report.keypad_critical, None);
    /// ```
    pub fn from_raw(state: u8, accessory: u8) -> Self {
        let has_accessory = accessory != NO_ACCESSORY;
        Self {
            critical: state & 0b0000_0001 != 0,
            charging: state & 0b0000_0010 != 0,
            level: (state & 0b1111_1100) >> 1,
            keypad_critical: has_accessory.then_some(accessory & 0b0011 == 0b0011),
            door_sensor_critical: has_accessory.then_some(accessory & 0b1100 == 0b1100),
        }
    }
}

/// One immutable state reading of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub kind: DeviceKind,
    pub lock_state: LockState,
    pub trigger: Trigger,
    pub last_action: Option<Action>,
    pub completion_status: CompletionStatus,
    /// Locks only; openers have no door sensor.
    pub door_sensor_state: Option<DoorSensorState>,
    pub battery: BatteryReport,
    pub device_time: Option<NaiveDateTime>,
}

/// A tracked field rendered for publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue {
    pub topic: &'static str,
    pub payload: String,
}

impl FieldValue {
    fn new(topic: &'static str, payload: impl Into<String>) -> Self {
        Self {
            topic,
            payload: payload.into(),
        }
    }
}

impl DeviceSnapshot {
    /// A snapshot with nothing known yet.
    pub fn undefined(kind: DeviceKind) -> Self {
        Self {
            kind,
            lock_state: LockState::Undefined,
            trigger: Trigger::Undefined,
            last_action: None,
            completion_status: CompletionStatus::Unknown,
            door_sensor_state: None,
            battery: BatteryReport::default(),
            device_time: None,
        }
    }

    /// Every tracked field as a topic suffix and payload, in publish order.
    ///
    /// Fields without a value (undefined home-automation state, absent door
    /// sensor or accessory batteries) are left out.
    pub fn tracked_fields(&self) -> Vec<FieldValue> {
        let mut fields = Vec::with_capacity(14);

        let availability = if self.lock_state == LockState::Undefined {
            PAYLOAD_OFFLINE
        } else {
            PAYLOAD_ONLINE
        };
        fields.push(FieldValue::new(TOPIC_AVAILABILITY, availability));
        fields.push(FieldValue::new(TOPIC_STATE, self.lock_state.as_str()));

        if let Some((ha_state, binary)) = self.lock_state.home_automation_state() {
            fields.push(FieldValue::new(TOPIC_HA_STATE, ha_state));
            if let Some(binary) = binary {
                fields.push(FieldValue::new(TOPIC_BINARY_STATE, binary));
            }
        }

        fields.push(FieldValue::new(TOPIC_TRIGGER, self.trigger.as_str()));
        if let Some(action) = self.last_action {
            fields.push(FieldValue::new(TOPIC_LAST_ACTION, action.as_str()));
        }
        fields.push(FieldValue::new(
            TOPIC_COMPLETION_STATUS,
            self.completion_status.as_str(),
        ));
        if let Some(door) = self.door_sensor_state {
            fields.push(FieldValue::new(TOPIC_DOOR_SENSOR_STATE, door.as_str()));
        }

        let battery = &self.battery;
        fields.push(FieldValue::new(TOPIC_BATTERY_CRITICAL, flag(battery.critical)));
        fields.push(FieldValue::new(TOPIC_BATTERY_CHARGING, flag(battery.charging)));
        fields.push(FieldValue::new(TOPIC_BATTERY_LEVEL, battery.level.to_string()));
        if let Some(critical) = battery.keypad_critical {
            fields.push(FieldValue::new(TOPIC_BATTERY_KEYPAD_CRITICAL, flag(critical)));
        }
        if let Some(critical) = battery.door_sensor_critical {
            fields.push(FieldValue::new(
                TOPIC_BATTERY_DOOR_SENSOR_CRITICAL,
                flag(critical),
            ));
        }

        fields
    }
}

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

/// Category of a device log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogEntryKind {
    LockAction,
    KeypadAction,
    DoorSensor,
    DoorbellRecognition,
    Calibration,
    Other,
}

/// One entry of the device's historical log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub index: u32,
    pub kind: LogEntryKind,
    pub auth_id: u32,
    pub auth_name: String,
    pub timestamp: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LogEntry {
    /// Whether the entry was caused by an identified user.
    pub fn is_authorized_action(&self) -> bool {
        matches!(self.kind, LogEntryKind::LockAction | LogEntryKind::KeypadAction)
    }
}

/// An entry of a variable-length device list that is mirrored as its own
/// topic and discovery entity.
pub trait DynamicEntry: Serialize {
    const LIST: DynamicList;

    /// Human-readable name used in the discovery registration.
    fn display_name(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeypadCode {
    pub code_id: u32,
    pub name: String,
    pub enabled: bool,
    pub created: Option<NaiveDateTime>,
    pub lock_count: u32,
    pub time_limited: bool,
}

impl DynamicEntry for KeypadCode {
    const LIST: DynamicList = DynamicList::KeypadCodes;

    fn display_name(&self) -> String {
        format!("Keypad code {}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeControlEntry {
    pub entry_id: u32,
    pub enabled: bool,
    /// Bit 0 is Monday.
    pub weekdays: u8,
    /// Local time as `HH:MM`.
    pub time: String,
    pub action: String,
}

impl DynamicEntry for TimeControlEntry {
    const LIST: DynamicList = DynamicList::TimeControl;

    fn display_name(&self) -> String {
        format!("Time control {} {}", self.time, self.action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationEntry {
    pub auth_id: u32,
    pub name: String,
    pub enabled: bool,
    pub remote_allowed: bool,
    pub lock_count: u32,
}

impl DynamicEntry for AuthorizationEntry {
    const LIST: DynamicList = DynamicList::Authorizations;

    fn display_name(&self) -> String {
        format!("Authorization {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LockAction;
    use rstest::rstest;

    #[rstest]
    #[case(LockState::Locked, Some(("locked", Some("locked"))))]
    #[case(LockState::Locking, Some(("locking", Some("locked"))))]
    #[case(LockState::Unlocking, Some(("unlocking", Some("unlocked"))))]
    #[case(LockState::UnlockedLockNgo, Some(("unlocked", Some("unlocked"))))]
    #[case(LockState::Unlatched, Some(("open", Some("unlocked"))))]
    #[case(LockState::Opening, Some(("opening", Some("unlocked"))))]
    #[case(LockState::MotorBlocked, Some(("jammed", None)))]
    #[case(LockState::Undefined, None)]
    fn test_home_automation_mapping(
        #[case] state: LockState,
        #[case] expected: Option<(&'static str, Option<&'static str>)>,
    ) {
        assert_eq!(state.home_automation_state(), expected);
    }

    #[rstest]
    #[case(0b0000_0000, 255, false, false, 0, None, None)]
    #[case(0b0000_0011, 255, true, true, 0, None, None)]
    #[case(0b0110_0100, 0b0000, false, false, 50, Some(false), Some(false))]
    #[case(0b0110_0100, 0b0011, false, false, 50, Some(true), Some(false))]
    #[case(0b0110_0100, 0b1100, false, false, 50, Some(false), Some(true))]
    #[case(0b0110_0100, 0b0001, false, false, 50, Some(false), Some(false))]
    fn test_battery_decoding(
        #[case] state: u8,
        #[case] accessory: u8,
        #[case] critical: bool,
        #[case] charging: bool,
        #[case] level: u8,
        #[case] keypad: Option<bool>,
        #[case] door: Option<bool>,
    ) {
        let report = BatteryReport::from_raw(state, accessory);
        assert_eq!(report.critical, critical);
        assert_eq!(report.charging, charging);
        assert_eq!(report.level, level);
        assert_eq!(report.keypad_critical, keypad);
        assert_eq!(report.door_sensor_critical, door);
    }

    #[test]
    fn test_undefined_snapshot_reports_offline() {
        let fields = DeviceSnapshot::undefined(DeviceKind::Lock).tracked_fields();
        assert_eq!(fields[0], FieldValue::new(TOPIC_AVAILABILITY, "offline"));
        assert!(!fields.iter().any(|f| f.topic == TOPIC_HA_STATE));
        assert!(!fields.iter().any(|f| f.topic == TOPIC_LAST_ACTION));
    }

    #[test]
    fn test_tracked_fields_for_locked_lock() {
        let snapshot = DeviceSnapshot {
            lock_state: LockState::Locked,
            last_action: Some(Action::Lock(LockAction::Lock)),
            door_sensor_state: Some(DoorSensorState::DoorClosed),
            ..DeviceSnapshot::undefined(DeviceKind::Lock)
        };
        let fields = snapshot.tracked_fields();
        let get = |topic: &str| {
            fields
                .iter()
                .find(|f| f.topic == topic)
                .map(|f| f.payload.as_str())
        };

        assert_eq!(get(TOPIC_AVAILABILITY), Some("online"));
        assert_eq!(get(TOPIC_STATE), Some("locked"));
        assert_eq!(get(TOPIC_HA_STATE), Some("locked"));
        assert_eq!(get(TOPIC_BINARY_STATE), Some("locked"));
        assert_eq!(get(TOPIC_LAST_ACTION), Some("lock"));
        assert_eq!(get(TOPIC_DOOR_SENSOR_STATE), Some("doorClosed"));
        assert_eq!(get(TOPIC_BATTERY_LEVEL), Some("0"));
    }

    #[test]
    fn test_tracked_field_topics_are_unique() {
        let snapshot = DeviceSnapshot {
            lock_state: LockState::Unlocked,
            door_sensor_state: Some(DoorSensorState::DoorOpened),
            battery: BatteryReport::from_raw(0xff, 0x0f),
            ..DeviceSnapshot::undefined(DeviceKind::Lock)
        };
        let fields = snapshot.tracked_fields();
        let mut topics: Vec<_> = fields.iter().map(|f| f.topic).collect();
        topics.sort_unstable();
        topics.dedup();
        assert_eq!(topics.len(), fields.len());
    }
}
