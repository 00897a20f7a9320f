//! Enum wrappers for hardware dispatch.
//!
//! Native `async fn` in traits is not object-safe, so `Box<dyn LockDriver>` is
//! not available. These enums give concrete dispatch instead, which keeps the
//! futures `Send` and lets the bridge spawn one task per device.
//!
//! # Examples
//!
//! ```
//! use lockbridge_core::DeviceKind;
//! use lockbridge_hardware::devices::AnyLockDriver;
//! use lockbridge_hardware::mock::MockLockDriver;
//! use lockbridge_hardware::traits::LockDriver;
//!
//! let (driver, _handle) = MockLockDriver::new(DeviceKind::Opener);
//! let driver = AnyLockDriver::Mock(driver);
//! assert_eq!(driver.kind(), DeviceKind::Opener);
//! ```

use std::net::Ipv4Addr;

use lockbridge_core::{Action, CmdResult, DeviceKind, StateQuery};

use crate::Result;
use crate::mock::{MockLockDriver, MockTransport};
use crate::traits::{DriverEvent, LockDriver, TransportBackend};
use crate::transport::SysfsTransport;
use crate::types::DeviceInfo;

/// Enum wrapper for device driver dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyLockDriver {
    /// Mock driver for development and testing.
    Mock(MockLockDriver),
    // TODO: add a variant for the BLE driver binding once its crate exposes
    // the pairing and key-turner API over an async interface.
}

impl LockDriver for AnyLockDriver {
    fn kind(&self) -> DeviceKind {
        match self {
            Self::Mock(driver) => driver.kind(),
        }
    }

    async fn next_event(&mut self) -> Result<DriverEvent> {
        match self {
            Self::Mock(driver) => driver.next_event().await,
        }
    }

    async fn send_command(&mut self, action: Action) -> CmdResult {
        match self {
            Self::Mock(driver) => driver.send_command(action).await,
        }
    }

    async fn set_config(&mut self, field: &str, value: &serde_json::Value) -> CmdResult {
        match self {
            Self::Mock(driver) => driver.set_config(field, value).await,
        }
    }

    async fn request_update(&mut self, query: StateQuery) -> CmdResult {
        match self {
            Self::Mock(driver) => driver.request_update(query).await,
        }
    }

    fn is_paired(&self) -> bool {
        match self {
            Self::Mock(driver) => driver.is_paired(),
        }
    }

    fn has_credential_configured(&self) -> bool {
        match self {
            Self::Mock(driver) => driver.has_credential_configured(),
        }
    }

    fn info(&self) -> DeviceInfo {
        match self {
            Self::Mock(driver) => driver.info(),
        }
    }
}

/// Enum wrapper for transport dispatch.
///
/// Wired adapters and Wi-Fi are both network interfaces on the host and
/// share [`SysfsTransport`]; they stay separate variants so logs and the
/// fallback policy can tell them apart.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyTransport {
    Ethernet(SysfsTransport),
    Wifi(SysfsTransport),
    Mock(MockTransport),
}

impl TransportBackend for AnyTransport {
    fn name(&self) -> String {
        match self {
            Self::Ethernet(transport) | Self::Wifi(transport) => transport.name(),
            Self::Mock(transport) => transport.name(),
        }
    }

    async fn detect(&mut self) -> Result<()> {
        match self {
            Self::Ethernet(transport) | Self::Wifi(transport) => transport.detect().await,
            Self::Mock(transport) => transport.detect().await,
        }
    }

    async fn link_up(&mut self) -> Result<bool> {
        match self {
            Self::Ethernet(transport) | Self::Wifi(transport) => transport.link_up().await,
            Self::Mock(transport) => transport.link_up().await,
        }
    }

    async fn acquire_address(&mut self) -> Result<Ipv4Addr> {
        match self {
            Self::Ethernet(transport) | Self::Wifi(transport) => transport.acquire_address().await,
            Self::Mock(transport) => transport.acquire_address().await,
        }
    }

    async fn apply_fallback_address(&mut self, address: Ipv4Addr) -> Result<()> {
        match self {
            Self::Ethernet(transport) | Self::Wifi(transport) => {
                transport.apply_fallback_address(address).await
            }
            Self::Mock(transport) => transport.apply_fallback_address(address).await,
        }
    }

    fn local_address(&self) -> Option<Ipv4Addr> {
        match self {
            Self::Ethernet(transport) | Self::Wifi(transport) => transport.local_address(),
            Self::Mock(transport) => transport.local_address(),
        }
    }

    fn is_wireless(&self) -> bool {
        match self {
            Self::Wifi(_) => true,
            Self::Ethernet(_) => false,
            Self::Mock(transport) => transport.is_wireless(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::transport::InterfaceConfig;
    use crate::types::HardwareId;
    use lockbridge_core::LockAction;

    #[tokio::test]
    async fn test_any_lock_driver_mock() {
        let (driver, handle) = MockLockDriver::new(DeviceKind::Lock);
        let mut driver = AnyLockDriver::Mock(driver);

        assert_eq!(driver.info().name, "Mock lock");
        assert!(driver.is_paired());
        let result = driver.send_command(Action::Lock(LockAction::Lock)).await;
        assert_eq!(result, CmdResult::Success);
        assert_eq!(handle.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_any_transport_mock() {
        let (transport, _handle) = MockTransport::new("mock0");
        let mut transport = AnyTransport::Mock(transport);

        transport.detect().await.unwrap();
        assert!(transport.link_up().await.unwrap());
        assert!(transport.acquire_address().await.is_ok());
        assert!(!transport.is_wireless());
    }

    #[test]
    fn test_wifi_variant_is_wireless() {
        let transport = AnyTransport::Wifi(SysfsTransport::new(InterfaceConfig::new(
            HardwareId::Wifi,
        )));
        assert!(transport.is_wireless());
        assert!(transport.name().starts_with("Built-in Wi-Fi"));
    }
}
