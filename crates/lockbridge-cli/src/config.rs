//! Gateway configuration file.
//!
//! The file is TOML; every section and every key is optional.
//!
//! ```toml
//! [mqtt]
//! host = "broker.local"
//! base_topic = "lockbridge"
//! discovery_prefix = "homeassistant"
//!
//! [network]
//! hardware = "lan8720"
//! network_timeout_secs = 300
//!
//! [[devices]]
//! kind = "lock"
//! name = "Front door"
//!
//! [[gpio.pins]]
//! pin = 4
//! role = "communicating"
//! ```
//!
//! Settings that the gateway resets on a bootloop are also kept in the
//! preference store; stored values take precedence over the file, see
//! [`BridgeConfig::apply_preferences`].

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use lockbridge_core::constants::*;
use lockbridge_bridge::heartbeat::DEFAULT_STALL_LIMIT;
use lockbridge_core::{DeviceKind, TopicPath};
use lockbridge_hardware::{GpioRoleTable, HardwareId};
use lockbridge_network::SupervisorConfig;
use lockbridge_network::mqtt::MqttConfig;
use lockbridge_storage::preferences::{
    KEY_MAX_RETRIES, KEY_NETWORK_HARDWARE, KEY_NETWORK_TIMEOUT_SECS, KEY_RESTART_ON_DISCONNECT,
    KEY_RETRY_DELAY_MS,
};
use lockbridge_storage::{BootloopPolicy, PreferenceStore};
use serde::Deserialize;
use tracing::{info, warn};

/// Location of the configuration file when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lockbridge/lockbridge.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub mqtt: MqttSection,
    pub network: NetworkSection,
    pub retry: RetrySection,
    pub gpio: GpioSection,
    pub storage: StorageSection,
    pub restart: RestartSection,
    pub devices: Vec<DeviceSection>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id_prefix: String,
    /// Topic path the device paths and maintenance topics live under.
    pub base_topic: String,
    /// Discovery prefix of the home-automation hub.
    pub discovery_prefix: Option<String>,
    pub discovery: bool,
    pub keep_alive_secs: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id_prefix: "lockbridge".to_string(),
            base_topic: "lockbridge".to_string(),
            discovery_prefix: Some("homeassistant".to_string()),
            discovery: true,
            keep_alive_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkSection {
    pub hardware: HardwareId,
    /// Overrides the usual interface name of the hardware.
    pub interface: Option<String>,
    pub static_address: Option<Ipv4Addr>,
    pub fallback_address: Ipv4Addr,
    pub wifi_fallback: bool,
    pub restart_on_disconnect: bool,
    /// Bound on one hardware detection.
    pub detect_timeout_ms: u64,
    /// Address requests before falling back to `fallback_address`.
    pub address_retries: u32,
    /// Reboot after being disconnected this long. Zero or negative disables.
    pub network_timeout_secs: i64,
    /// Seconds between two supervision steps.
    pub supervise_interval_secs: u64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            hardware: HardwareId::Wifi,
            interface: None,
            static_address: None,
            fallback_address: Ipv4Addr::new(192, 168, 4, 1),
            wifi_fallback: true,
            restart_on_disconnect: false,
            detect_timeout_ms: 5000,
            address_retries: 3,
            network_timeout_secs: -1,
            supervise_interval_secs: 5,
        }
    }
}

impl NetworkSection {
    pub fn network_timeout(&self) -> Option<Duration> {
        u64::try_from(self.network_timeout_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_retries: u32,
    pub retry_delay_ms: u32,
    /// Requests a device queues before answering `busy`.
    pub queue_capacity: usize,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            queue_capacity: lockbridge_bridge::worker::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GpioSection {
    pub pins: GpioRoleTable,
    /// Kernel watchdog device, e.g. `/dev/watchdog`.
    pub watchdog: Option<PathBuf>,
    /// A task silent for longer than this stops the watchdog feeding.
    pub watchdog_stall_secs: u64,
}

impl Default for GpioSection {
    fn default() -> Self {
        Self {
            pins: GpioRoleTable::default(),
            watchdog: None,
            watchdog_stall_secs: DEFAULT_STALL_LIMIT.as_secs(),
        }
    }
}

impl GpioSection {
    pub fn stall_limit(&self) -> Duration {
        Duration::from_secs(self.watchdog_stall_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub database: String,
    /// File that survives a warm restart, e.g. on a tmpfs under `/run`.
    pub restart_record: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            database: "/var/lib/lockbridge/lockbridge.db".to_string(),
            restart_record: PathBuf::from("/run/lockbridge/restart.bin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RestartSection {
    pub bootloop_reset: bool,
    pub bootloop_threshold: u32,
    pub stable_uptime_secs: u64,
}

impl Default for RestartSection {
    fn default() -> Self {
        let policy = BootloopPolicy::default();
        Self {
            bootloop_reset: policy.enable_reset,
            bootloop_threshold: policy.threshold,
            stable_uptime_secs: policy.stable_uptime.as_secs(),
        }
    }
}

impl RestartSection {
    pub fn policy(&self) -> BootloopPolicy {
        BootloopPolicy {
            enable_reset: self.bootloop_reset,
            threshold: self.bootloop_threshold,
            stable_uptime: Duration::from_secs(self.stable_uptime_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSection {
    pub kind: DeviceKind,
    #[serde(default)]
    pub name: Option<String>,
    /// Defaults to `<base_topic>/<kind>`.
    #[serde(default)]
    pub topic: Option<String>,
    /// Defaults to the kind.
    #[serde(default)]
    pub unique_id: Option<String>,
}

impl BridgeConfig {
    /// Read the configuration from `path`.
    ///
    /// A missing file at the default location yields the defaults; a missing
    /// file given explicitly is an error.
    pub fn load(path: &Path, explicit: bool) -> anyhow::Result<Self> {
        if !explicit && !path.exists() {
            warn!("{} not found, using defaults", path.display());
            return Self::default().validated();
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validated()
    }

    fn validated(mut self) -> anyhow::Result<Self> {
        if self.devices.is_empty() {
            self.devices.push(DeviceSection {
                kind: DeviceKind::Lock,
                name: None,
                topic: None,
                unique_id: None,
            });
        }
        TopicPath::new(&self.mqtt.base_topic).context("mqtt.base_topic")?;
        for kind in [DeviceKind::Lock, DeviceKind::Opener] {
            if self.devices.iter().filter(|d| d.kind == kind).count() > 1 {
                bail!("more than one {} configured", kind);
            }
        }
        for device in &self.devices {
            self.device_topic(device)?;
        }
        Ok(self)
    }

    pub fn base_topic(&self) -> anyhow::Result<TopicPath> {
        Ok(TopicPath::new(&self.mqtt.base_topic)?)
    }

    /// Topic path of `device`.
    pub fn device_topic(&self, device: &DeviceSection) -> anyhow::Result<TopicPath> {
        let topic = match &device.topic {
            Some(topic) => TopicPath::new(topic)?,
            None => self.base_topic()?.join(&format!("/{}", device.kind.as_str()))?,
        };
        Ok(topic)
    }

    /// Root of the discovery topics, `None` when discovery is off.
    pub fn discovery_root(&self) -> anyhow::Result<Option<TopicPath>> {
        if !self.mqtt.discovery {
            return Ok(None);
        }
        self.mqtt
            .discovery_prefix
            .as_deref()
            .map(|prefix| TopicPath::new(prefix).map_err(anyhow::Error::from))
            .transpose()
    }

    /// Broker session settings. The last will goes to the availability topic
    /// of the first device.
    pub fn mqtt_config(&self) -> anyhow::Result<MqttConfig> {
        let mut config = MqttConfig::new(self.mqtt.host.clone(), self.mqtt.port)
            .client_id_prefix(self.mqtt.client_id_prefix.clone())
            .keep_alive(Duration::from_secs(self.mqtt.keep_alive_secs));
        if let (Some(username), Some(password)) = (&self.mqtt.username, &self.mqtt.password) {
            config = config.credentials(username.clone(), password.clone());
        }
        if let Some(device) = self.devices.first() {
            config = config.availability_topic(self.device_topic(device)?.join(TOPIC_AVAILABILITY)?);
        }
        Ok(config)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::default()
            .detect_timeout(Duration::from_millis(self.network.detect_timeout_ms))
            .address_retries(self.network.address_retries)
            .fallback_address(self.network.fallback_address)
            .restart_on_disconnect(self.network.restart_on_disconnect)
            .network_timeout(self.network.network_timeout())
            .wifi_fallback(self.network.wifi_fallback && !self.network.hardware.is_wireless())
    }

    /// Override file settings with the values kept in the preference store.
    pub async fn apply_preferences(&mut self, preferences: &PreferenceStore) -> anyhow::Result<()> {
        if let Some(hardware) = preferences.get_string(KEY_NETWORK_HARDWARE).await? {
            match serde_json::from_value::<HardwareId>(serde_json::Value::String(hardware.clone())) {
                Ok(hardware) => self.network.hardware = hardware,
                Err(_) => warn!("Ignoring stored network hardware {:?}", hardware),
            }
        }
        if let Some(retries) = preferences.get_i64(KEY_MAX_RETRIES).await? {
            self.retry.max_retries = u32::try_from(retries).unwrap_or(DEFAULT_MAX_RETRIES);
        }
        if let Some(delay) = preferences.get_i64(KEY_RETRY_DELAY_MS).await? {
            self.retry.retry_delay_ms = u32::try_from(delay).unwrap_or(DEFAULT_RETRY_DELAY_MS);
        }
        if let Some(restart) = preferences.get_bool(KEY_RESTART_ON_DISCONNECT).await? {
            self.network.restart_on_disconnect = restart;
        }
        if let Some(timeout) = preferences.get_i64(KEY_NETWORK_TIMEOUT_SECS).await? {
            self.network.network_timeout_secs = timeout;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbridge_hardware::{PinId, PinRole};
    use lockbridge_storage::Database;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = BridgeConfig::parse("").unwrap();

        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.network.hardware, HardwareId::Wifi);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(
            config.device_topic(&config.devices[0]).unwrap().as_str(),
            "lockbridge/lock"
        );
        assert_eq!(config.network.network_timeout(), None);
    }

    #[test]
    fn test_full_file() {
        let config = BridgeConfig::parse(
            r#"
            [mqtt]
            host = "broker.local"
            base_topic = "home/gateway"
            discovery_prefix = "ha"

            [network]
            hardware = "lan8720"
            static_address = "10.0.0.20"
            network_timeout_secs = 300

            [retry]
            max_retries = 5
            retry_delay_ms = 250

            [[gpio.pins]]
            pin = 4
            role = "communicating"

            [[gpio.pins]]
            pin = 5
            role = "communication_error"

            [[devices]]
            kind = "opener"
            name = "Street door"
            "#,
        )
        .unwrap();

        assert_eq!(config.network.hardware, HardwareId::Lan8720);
        assert_eq!(config.network.static_address, Some(Ipv4Addr::new(10, 0, 0, 20)));
        assert_eq!(config.network.network_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.gpio.pins.pins_for(PinRole::Communicating), vec![PinId(4)]);
        assert_eq!(
            config.device_topic(&config.devices[0]).unwrap().as_str(),
            "home/gateway/opener"
        );
        assert_eq!(config.discovery_root().unwrap().unwrap().as_str(), "ha");
        assert!(config.supervisor_config().wifi_fallback);
    }

    #[test]
    fn test_discovery_can_be_disabled() {
        let config = BridgeConfig::parse("[mqtt]\ndiscovery = false").unwrap();
        assert_eq!(config.discovery_root().unwrap(), None);
    }

    #[test]
    fn test_watchdog_stall_limit() {
        let config = BridgeConfig::parse("").unwrap();
        assert_eq!(config.gpio.stall_limit(), Duration::from_secs(60));

        let config =
            BridgeConfig::parse("[gpio]\nwatchdog = \"/dev/watchdog\"\nwatchdog_stall_secs = 0")
                .unwrap();
        assert_eq!(config.gpio.stall_limit(), Duration::from_secs(1));
    }

    #[rstest]
    #[case("[mqtt]\nport = \"high\"")]
    #[case("[network]\nhardware = \"token_ring\"")]
    #[case("[mqtt]\nbase_topic = \"a/#\"")]
    #[case("[[devices]]\nkind = \"lock\"\n[[devices]]\nkind = \"lock\"")]
    #[case("unknown_key = 1")]
    fn test_invalid_files(#[case] content: &str) {
        assert!(BridgeConfig::parse(content).is_err());
    }

    #[test]
    fn test_wifi_never_falls_back_to_itself() {
        let config = BridgeConfig::parse("[network]\nhardware = \"wifi\"").unwrap();
        assert!(!config.supervisor_config().wifi_fallback);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mqtt]\nhost = \"10.1.1.1\"").unwrap();

        let config = BridgeConfig::load(file.path(), true).unwrap();
        assert_eq!(config.mqtt.host, "10.1.1.1");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(BridgeConfig::load(&path, true).is_err());
        assert_eq!(BridgeConfig::load(&path, false).unwrap().mqtt.host, "localhost");
    }

    #[test]
    fn test_mqtt_last_will_on_first_device() {
        let config = BridgeConfig::parse("[[devices]]\nkind = \"opener\"").unwrap();
        let mqtt = config.mqtt_config().unwrap();
        assert_eq!(
            mqtt.availability_topic.unwrap().as_str(),
            "lockbridge/opener/availability"
        );
    }

    #[tokio::test]
    async fn test_stored_preferences_take_precedence() {
        let db = Database::in_memory().await.unwrap();
        let preferences = PreferenceStore::new(&db);
        preferences.apply_safe_defaults().await.unwrap();
        preferences.put_i64(KEY_NETWORK_TIMEOUT_SECS, 120).await.unwrap();

        let mut config = BridgeConfig::parse(
            "[network]\nhardware = \"w5500\"\nrestart_on_disconnect = true\n[retry]\nmax_retries = 9",
        )
        .unwrap();
        config.apply_preferences(&preferences).await.unwrap();

        assert_eq!(config.network.hardware, HardwareId::Wifi);
        assert!(!config.network.restart_on_disconnect);
        assert_eq!(config.retry.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.network.network_timeout(), Some(Duration::from_secs(120)));
    }
}
