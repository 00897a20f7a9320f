//! Network interface backend for Linux hosts.
//!
//! The adapter's kernel driver registers a network interface; presence,
//! carrier and operational state are read from sysfs. Address acquisition is
//! left to the host (DHCP client or static configuration) and observed here.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::traits::TransportBackend;
use crate::types::HardwareId;
use crate::{HardwareError, Result};

const DEFAULT_SYSFS_ROOT: &str = "/sys/class/net";

/// Transport configuration for one interface.
#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    pub hardware: HardwareId,
    /// Interface name, defaults to the hardware's usual name.
    pub interface: String,
    /// Statically configured address, if the host does not lease one.
    pub static_address: Option<Ipv4Addr>,
    /// Remote address used to find the route's source address.
    pub route_target: SocketAddr,
    pub sysfs_root: PathBuf,
}

impl InterfaceConfig {
    pub fn new(hardware: HardwareId) -> Self {
        Self {
            hardware,
            interface: hardware.default_interface().to_string(),
            static_address: None,
            route_target: SocketAddr::from(([192, 0, 2, 1], 9)),
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
        }
    }

    /// Override the interface name.
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    pub fn static_address(mut self, address: Option<Ipv4Addr>) -> Self {
        self.static_address = address;
        self
    }

    pub fn route_target(mut self, target: SocketAddr) -> Self {
        self.route_target = target;
        self
    }

    /// Read interface state below `root` instead of `/sys/class/net`.
    pub fn sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }
}

/// [`TransportBackend`] for a network interface managed by the host.
#[derive(Debug)]
pub struct SysfsTransport {
    config: InterfaceConfig,
    current: Option<Ipv4Addr>,
}

impl SysfsTransport {
    pub fn new(config: InterfaceConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    fn interface_dir(&self) -> PathBuf {
        self.config.sysfs_root.join(&self.config.interface)
    }

    async fn read_attribute(&self, attribute: &str) -> Result<String> {
        let path = self.interface_dir().join(attribute);
        let value = tokio::fs::read_to_string(&path).await?;
        Ok(value.trim().to_string())
    }

    /// Source address the kernel picks for the route target.
    async fn route_source_address(&self) -> Result<Ipv4Addr> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
        socket
            .connect(self.config.route_target)
            .await
            .map_err(|e| HardwareError::address_assignment(format!("no route: {e}")))?;
        match socket.local_addr()?.ip() {
            IpAddr::V4(address) if !address.is_unspecified() => Ok(address),
            other => Err(HardwareError::address_assignment(format!(
                "no IPv4 source address ({other})"
            ))),
        }
    }
}

impl TransportBackend for SysfsTransport {
    fn name(&self) -> String {
        format!("{} ({})", self.config.hardware, self.config.interface)
    }

    async fn detect(&mut self) -> Result<()> {
        match tokio::fs::metadata(self.interface_dir()).await {
            Ok(_) => {
                debug!("Interface {} present", self.config.interface);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(HardwareError::not_detected(self.config.interface.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn link_up(&mut self) -> Result<bool> {
        // carrier is unreadable while the interface is administratively down
        let carrier = self.read_attribute("carrier").await.unwrap_or_default();
        let operstate = self.read_attribute("operstate").await?;
        Ok(carrier == "1" || operstate == "up")
    }

    async fn acquire_address(&mut self) -> Result<Ipv4Addr> {
        let address = match self.config.static_address {
            Some(address) => address,
            None => self.route_source_address().await?,
        };
        self.current = Some(address);
        Ok(address)
    }

    async fn apply_fallback_address(&mut self, address: Ipv4Addr) -> Result<()> {
        warn!(
            "Using fallback address {} on {}",
            address, self.config.interface
        );
        self.current = Some(address);
        Ok(())
    }

    fn local_address(&self) -> Option<Ipv4Addr> {
        self.current
    }

    fn is_wireless(&self) -> bool {
        self.config.hardware.is_wireless()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_interface(root: &TempDir, name: &str, carrier: &str, operstate: &str) {
        let dir = root.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("carrier"), format!("{carrier}\n")).unwrap();
        std::fs::write(dir.join("operstate"), format!("{operstate}\n")).unwrap();
    }

    #[tokio::test]
    async fn test_missing_interface_is_not_detected() {
        let root = TempDir::new().unwrap();
        let config = InterfaceConfig::new(HardwareId::Lan8720).sysfs_root(root.path());
        let mut transport = SysfsTransport::new(config);

        let err = transport.detect().await.unwrap_err();
        assert!(matches!(err, HardwareError::NotDetected { .. }));
    }

    #[tokio::test]
    async fn test_link_state_from_sysfs() {
        let root = TempDir::new().unwrap();
        fake_interface(&root, "eth0", "0", "down");
        let config = InterfaceConfig::new(HardwareId::Lan8720).sysfs_root(root.path());
        let mut transport = SysfsTransport::new(config);

        transport.detect().await.unwrap();
        assert!(!transport.link_up().await.unwrap());

        fake_interface(&root, "eth0", "1", "up");
        assert!(transport.link_up().await.unwrap());
    }

    #[tokio::test]
    async fn test_static_address_is_used() {
        let root = TempDir::new().unwrap();
        fake_interface(&root, "wlan0", "1", "up");
        let address = Ipv4Addr::new(10, 0, 0, 7);
        let config = InterfaceConfig::new(HardwareId::Wifi)
            .sysfs_root(root.path())
            .static_address(Some(address));
        let mut transport = SysfsTransport::new(config);

        assert_eq!(transport.acquire_address().await.unwrap(), address);
        assert_eq!(transport.local_address(), Some(address));
        assert!(transport.name().contains("wlan0"));
    }
}
