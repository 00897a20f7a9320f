//! Reasons for deliberate restarts.
//!
//! A reason is written to retained memory right before every intentional
//! restart and read back once at the next boot.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Why the gateway restarted itself.
///
/// The numeric codes are part of the retained record format and must never be
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RestartReason {
    RequestedViaMqtt,
    BleBeaconWatchdog,
    RestartOnDisconnectWatchdog,
    RestartIntervalWatchdog,
    NetworkTimeoutWatchdog,
    WifiInitFailed,
    ReconfigureWifi,
    ReconfigureEthernet,
    NetworkDeviceCriticalFailure,
    NetworkDeviceCriticalFailureNoWifiFallback,
    ConfigurationUpdated,
    GpioConfigurationUpdated,
    RestartTimer,
    OtaCompleted,
    OtaTimeout,
    OtaAborted,
    OtaUnknownState,
    OtaReboot,
    ImportCompleted,
    DeviceUnpaired,
    FactoryReset,
    NotApplicable,
}

/// Coarse grouping of restart reasons used by diagnostics and the bootloop
/// counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartClass {
    Operator,
    Configuration,
    Watchdog,
    Update,
    Failure,
}

impl RestartReason {
    pub const ALL: [RestartReason; 22] = [
        Self::RequestedViaMqtt,
        Self::BleBeaconWatchdog,
        Self::RestartOnDisconnectWatchdog,
        Self::RestartIntervalWatchdog,
        Self::NetworkTimeoutWatchdog,
        Self::WifiInitFailed,
        Self::ReconfigureWifi,
        Self::ReconfigureEthernet,
        Self::NetworkDeviceCriticalFailure,
        Self::NetworkDeviceCriticalFailureNoWifiFallback,
        Self::ConfigurationUpdated,
        Self::GpioConfigurationUpdated,
        Self::RestartTimer,
        Self::OtaCompleted,
        Self::OtaTimeout,
        Self::OtaAborted,
        Self::OtaUnknownState,
        Self::OtaReboot,
        Self::ImportCompleted,
        Self::DeviceUnpaired,
        Self::FactoryReset,
        Self::NotApplicable,
    ];

    /// Stable code stored in the retained record.
    pub fn code(self) -> u32 {
        match self {
            Self::RequestedViaMqtt => 1,
            Self::BleBeaconWatchdog => 2,
            Self::RestartOnDisconnectWatchdog => 3,
            Self::RestartIntervalWatchdog => 4,
            Self::NetworkTimeoutWatchdog => 5,
            Self::WifiInitFailed => 6,
            Self::ReconfigureWifi => 7,
            Self::ReconfigureEthernet => 8,
            Self::NetworkDeviceCriticalFailure => 9,
            Self::NetworkDeviceCriticalFailureNoWifiFallback => 10,
            Self::ConfigurationUpdated => 11,
            Self::GpioConfigurationUpdated => 12,
            Self::RestartTimer => 13,
            Self::OtaCompleted => 14,
            Self::OtaTimeout => 15,
            Self::OtaAborted => 16,
            Self::OtaUnknownState => 17,
            Self::OtaReboot => 18,
            Self::ImportCompleted => 19,
            Self::DeviceUnpaired => 20,
            Self::FactoryReset => 21,
            Self::NotApplicable => 22,
        }
    }

    /// Decode a retained code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRestartReason`] for codes this build does not
    /// know.
    pub fn from_code(code: u32) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|reason| reason.code() == code)
            .ok_or(Error::InvalidRestartReason(code))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestedViaMqtt => "RequestedViaMqtt",
            Self::BleBeaconWatchdog => "BLEBeaconWatchdog",
            Self::RestartOnDisconnectWatchdog => "RestartOnDisconnectWatchdog",
            Self::RestartIntervalWatchdog => "RestartIntervalWatchdog",
            Self::NetworkTimeoutWatchdog => "NetworkTimeoutWatchdog",
            Self::WifiInitFailed => "WifiInitFailed",
            Self::ReconfigureWifi => "ReconfigureWifi",
            Self::ReconfigureEthernet => "ReconfigureEthernet",
            Self::NetworkDeviceCriticalFailure => "NetworkDeviceCriticalFailure",
            Self::NetworkDeviceCriticalFailureNoWifiFallback => {
                "NetworkDeviceCriticalFailureNoWifiFallback"
            }
            Self::ConfigurationUpdated => "ConfigurationUpdated",
            Self::GpioConfigurationUpdated => "GpioConfigurationUpdated",
            Self::RestartTimer => "RestartTimer",
            Self::OtaCompleted => "OTACompleted",
            Self::OtaTimeout => "OTATimeout",
            Self::OtaAborted => "OTAAborted",
            Self::OtaUnknownState => "OTAUnknownState",
            Self::OtaReboot => "OTAReboot",
            Self::ImportCompleted => "ImportCompleted",
            Self::DeviceUnpaired => "DeviceUnpaired",
            Self::FactoryReset => "FactoryReset",
            Self::NotApplicable => "NotApplicable",
        }
    }

    pub fn class(self) -> RestartClass {
        match self {
            Self::RequestedViaMqtt | Self::RestartTimer | Self::DeviceUnpaired => {
                RestartClass::Operator
            }
            Self::ReconfigureWifi
            | Self::ReconfigureEthernet
            | Self::ConfigurationUpdated
            | Self::GpioConfigurationUpdated
            | Self::ImportCompleted
            | Self::FactoryReset
            | Self::NotApplicable => RestartClass::Configuration,
            Self::BleBeaconWatchdog
            | Self::RestartOnDisconnectWatchdog
            | Self::RestartIntervalWatchdog
            | Self::NetworkTimeoutWatchdog => RestartClass::Watchdog,
            Self::OtaCompleted
            | Self::OtaTimeout
            | Self::OtaAborted
            | Self::OtaUnknownState
            | Self::OtaReboot => RestartClass::Update,
            Self::WifiInitFailed
            | Self::NetworkDeviceCriticalFailure
            | Self::NetworkDeviceCriticalFailureNoWifiFallback => RestartClass::Failure,
        }
    }

    /// Whether a boot following this reason counts towards bootloop detection.
    pub fn is_abnormal(self) -> bool {
        matches!(self.class(), RestartClass::Watchdog | RestartClass::Failure)
    }
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashSet;

    #[test]
    fn test_codes_are_unique_and_round_trip() {
        let mut seen = HashSet::new();
        for reason in RestartReason::ALL {
            assert!(seen.insert(reason.code()), "duplicate code for {reason}");
            assert_eq!(RestartReason::from_code(reason.code()).unwrap(), reason);
        }
    }

    #[test]
    fn test_unknown_code_is_rejected() {
        assert!(matches!(
            RestartReason::from_code(0),
            Err(Error::InvalidRestartReason(0))
        ));
        assert!(RestartReason::from_code(999).is_err());
    }

    #[rstest]
    #[case(RestartReason::RestartOnDisconnectWatchdog, RestartClass::Watchdog, true)]
    #[case(RestartReason::NetworkTimeoutWatchdog, RestartClass::Watchdog, true)]
    #[case(RestartReason::NetworkDeviceCriticalFailure, RestartClass::Failure, true)]
    #[case(RestartReason::RequestedViaMqtt, RestartClass::Operator, false)]
    #[case(RestartReason::ConfigurationUpdated, RestartClass::Configuration, false)]
    #[case(RestartReason::OtaCompleted, RestartClass::Update, false)]
    fn test_classification(
        #[case] reason: RestartReason,
        #[case] class: RestartClass,
        #[case] abnormal: bool,
    ) {
        assert_eq!(reason.class(), class);
        assert_eq!(reason.is_abnormal(), abnormal);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(RestartReason::BleBeaconWatchdog.to_string(), "BLEBeaconWatchdog");
        assert_eq!(RestartReason::OtaReboot.to_string(), "OTAReboot");
    }
}
