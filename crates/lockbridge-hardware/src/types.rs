//! Common types shared across hardware implementations.
//!
//! This module defines GPIO pin roles and the role table resolved at boot,
//! the transport hardware identifiers and static device information.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Generic device information reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device name as configured on the device.
    pub name: String,

    /// Device model identifier.
    pub model: String,

    /// Optional firmware version string.
    pub firmware_version: Option<String>,
}

impl DeviceInfo {
    /// Create a new DeviceInfo with required fields.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            firmware_version: None,
        }
    }

    /// Set the firmware version.
    pub fn with_firmware_version(mut self, firmware_version: impl Into<String>) -> Self {
        self.firmware_version = Some(firmware_version.into());
        self
    }
}

/// A GPIO line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinId(pub u16);

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

/// What a GPIO pin is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinRole {
    /// Driven high while a device command is in flight.
    Communicating,
    /// Driven high while a failed command is being retried.
    CommunicationError,
    MqttConnected,
    NetworkConnected,
    Locked,
    Disabled,
}

/// One `{pin, role}` pair of the role table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinAssignment {
    pub pin: PinId,
    pub role: PinRole,
}

/// GPIO role table, resolved once at boot.
///
/// # Examples
///
/// ```
/// use lockbridge_hardware::types::{GpioRoleTable, PinAssignment, PinId, PinRole};
///
/// let table = GpioRoleTable::new(vec![
///     PinAssignment { pin: PinId(4), role: PinRole::Communicating },
///     PinAssignment { pin: PinId(5), role: PinRole::CommunicationError },
///     PinAssignment { pin: PinId(6), role: PinRole::Communicating },
/// ]);
///
/// assert_eq!(table.pins_for(PinRole::Communicating), vec![PinId(4), PinId(6)]);
/// assert!(table.pins_for(PinRole::Locked).is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GpioRoleTable {
    assignments: Vec<PinAssignment>,
}

impl GpioRoleTable {
    pub fn new(assignments: Vec<PinAssignment>) -> Self {
        Self { assignments }
    }

    /// Pins bound to `role`, in table order.
    pub fn pins_for(&self, role: PinRole) -> Vec<PinId> {
        self.assignments
            .iter()
            .filter(|assignment| assignment.role == role)
            .map(|assignment| assignment.pin)
            .collect()
    }

    pub fn assignments(&self) -> &[PinAssignment] {
        &self.assignments
    }
}

/// Configured network hardware.
///
/// Exactly one is bound per boot. Wired adapters differ in the interface
/// name their kernel driver registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareId {
    Wifi,
    W5500,
    W5500M5,
    W5500M5S3,
    WaveshareEsp32S3Eth,
    Eth01Evo,
    LilygoTEthElite,
    LilygoTEthLiteS3,
    Lan8720,
    Custom,
}

impl HardwareId {
    pub fn is_wireless(self) -> bool {
        matches!(self, Self::Wifi)
    }

    /// Interface name used when the configuration does not override it.
    pub fn default_interface(self) -> &'static str {
        match self {
            Self::Wifi => "wlan0",
            Self::Lan8720 | Self::Eth01Evo => "eth0",
            Self::W5500
            | Self::W5500M5
            | Self::W5500M5S3
            | Self::WaveshareEsp32S3Eth
            | Self::LilygoTEthElite
            | Self::LilygoTEthLiteS3 => "eth1",
            Self::Custom => "eth0",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wifi => "Built-in Wi-Fi",
            Self::W5500 => "Generic W5500",
            Self::W5500M5 => "M5Stack Atom POE (W5500)",
            Self::W5500M5S3 => "M5Stack Atom POE S3 (W5500)",
            Self::WaveshareEsp32S3Eth => "Waveshare ESP32-S3-ETH",
            Self::Eth01Evo => "ETH01-Evo",
            Self::LilygoTEthElite => "LilyGO T-ETH ELite",
            Self::LilygoTEthLiteS3 => "LilyGO T-ETH-Lite-ESP32S3",
            Self::Lan8720 => "LAN8720",
            Self::Custom => "Custom Ethernet",
        }
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
