//! Topic suffixes, timing constants and limits shared by the gateway crates.
//!
//! Topic suffixes are appended to the configured per-device base path
//! (for example `lockbridge/lock`) through [`TopicPath`](crate::TopicPath).
//!
//! ```
//! use lockbridge_core::constants::*;
//! use lockbridge_core::TopicPath;
//!
//! let topic = TopicPath::new("lockbridge/lock").unwrap().join(TOPIC_STATE).unwrap();
//! assert_eq!(topic.as_str(), "lockbridge/lock/state");
//! ```

use std::time::Duration;

// ============================================================================
// Topic limits
// ============================================================================

/// Longest topic accepted by [`TopicPath`](crate::TopicPath).
///
/// MQTT allows 65535 bytes, brokers and home-automation hubs commonly choke
/// well before that.
pub const MAX_TOPIC_LENGTH: usize = 255;

// ============================================================================
// Device topics
// ============================================================================

pub const TOPIC_STATE: &str = "/state";
pub const TOPIC_HA_STATE: &str = "/hastate";
pub const TOPIC_BINARY_STATE: &str = "/binaryState";
pub const TOPIC_JSON: &str = "/json";
pub const TOPIC_TRIGGER: &str = "/trigger";
pub const TOPIC_LAST_ACTION: &str = "/lastLockAction";
pub const TOPIC_COMPLETION_STATUS: &str = "/completionStatus";
pub const TOPIC_DOOR_SENSOR_STATE: &str = "/doorSensorState";
pub const TOPIC_AVAILABILITY: &str = "/availability";

pub const TOPIC_ACTION: &str = "/action";
pub const TOPIC_COMMAND_RESULT: &str = "/commandResult";

pub const TOPIC_BATTERY_CRITICAL: &str = "/battery/critical";
pub const TOPIC_BATTERY_CHARGING: &str = "/battery/charging";
pub const TOPIC_BATTERY_LEVEL: &str = "/battery/level";
pub const TOPIC_BATTERY_KEYPAD_CRITICAL: &str = "/battery/keypadCritical";
pub const TOPIC_BATTERY_DOOR_SENSOR_CRITICAL: &str = "/battery/doorSensorCritical";
pub const TOPIC_BATTERY_JSON: &str = "/battery/basicJson";

pub const TOPIC_LOG: &str = "/log";
pub const TOPIC_LOG_LAST: &str = "/log/last";
pub const TOPIC_AUTHORIZATION_ID: &str = "/authorizationId";
pub const TOPIC_AUTHORIZATION_NAME: &str = "/authorizationName";

pub const TOPIC_RING: &str = "/ring";
pub const TOPIC_BINARY_RING: &str = "/binaryRing";

pub const TOPIC_KEYPAD_CODES: &str = "/keypad/codes";
pub const TOPIC_TIMECONTROL_ENTRIES: &str = "/timecontrol/entries";
pub const TOPIC_AUTH_ENTRIES: &str = "/auth/entries";

pub const TOPIC_QUERY_LOCKSTATE: &str = "/query/lockstate";
pub const TOPIC_QUERY_CONFIG: &str = "/query/config";
pub const TOPIC_QUERY_KEYPAD: &str = "/query/keypad";
pub const TOPIC_QUERY_BATTERY: &str = "/query/battery";

pub const TOPIC_CONFIG_ACTION: &str = "/configuration/action";
pub const TOPIC_CONFIG_RESULT: &str = "/configuration/commandResult";

pub const TOPIC_MAINTENANCE_RESTART_REASON: &str = "/maintenance/restartReason";
pub const TOPIC_MAINTENANCE_UPTIME: &str = "/maintenance/uptime";
pub const TOPIC_MAINTENANCE_MQTT_STATE: &str = "/maintenance/mqttConnectionState";
pub const TOPIC_MAINTENANCE_NETWORK_DEVICE: &str = "/maintenance/networkDevice";
pub const TOPIC_MAINTENANCE_BOOTLOOP_COUNTER: &str = "/maintenance/bootloopCounter";
pub const TOPIC_MAINTENANCE_RESET: &str = "/maintenance/reset";

// ============================================================================
// Payload literals
// ============================================================================

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";
pub const PAYLOAD_RING: &str = "ring";
pub const PAYLOAD_RING_LOCKED: &str = "ringlocked";
pub const PAYLOAD_STANDBY: &str = "standby";

/// Written to a query or reset topic to trigger it.
pub const PAYLOAD_REQUESTED: &str = "1";
/// Written back once the request was taken.
pub const PAYLOAD_CLEARED: &str = "0";

/// Payloads on the action topic that are our own acknowledgements echoed back.
pub const IGNORED_ACTION_PAYLOADS: [&str; 7] =
    ["", "--", "ack", "unknown_action", "denied", "error", "busy"];

// ============================================================================
// Timing
// ============================================================================

/// Uptime below which link loss never forces a reboot.
pub const RESTART_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Dwell time before the binary ring topic returns to standby.
pub const RING_DWELL: Duration = Duration::from_millis(2000);

/// Window after an MQTT (re)connect in which action messages are ignored.
pub const RECENT_CONNECT_WINDOW: Duration = Duration::from_secs(6);

/// Consecutive failed MQTT reconnects before the transport is cycled.
pub const MAX_MQTT_RECONNECTS: u32 = 15;

// ============================================================================
// Retry defaults
// ============================================================================

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u32 = 100;

/// Retry delays below this are raised to it.
pub const MIN_RETRY_DELAY_MS: u32 = 100;

// ============================================================================
// Restart diagnostics
// ============================================================================

/// Marker that validates a retained restart record.
pub const RESTART_RECORD_SENTINEL: u64 = 0xa00a_b00b_c00b_d00d;

/// Marker that validates the retained bootloop counter.
pub const BOOTLOOP_RECORD_SENTINEL: u64 = 0xb00b_a00a_d00d_c00c;

pub const DEFAULT_BOOTLOOP_THRESHOLD: u32 = 10;

/// Uptime after which the bootloop counter is cleared.
pub const DEFAULT_STABLE_UPTIME: Duration = Duration::from_secs(120);
