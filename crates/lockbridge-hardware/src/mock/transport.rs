//! Mock network transport.
//!
//! Tests flip hardware presence, link state and address availability through
//! a [`MockTransportHandle`] and read back how often each step was tried.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::traits::TransportBackend;
use crate::{HardwareError, Result};

#[derive(Debug)]
struct TransportState {
    detected: bool,
    link: bool,
    wireless: bool,
    address: Option<Ipv4Addr>,
    detect_latency: Duration,
    fallback_latency: Duration,
    fallback_failures: u32,
    detect_calls: u32,
    address_calls: u32,
    fallback: Option<Ipv4Addr>,
    current: Option<Ipv4Addr>,
}

/// Scriptable [`TransportBackend`].
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    /// A present, linked transport that leases `192.168.1.50`.
    pub fn new(name: impl Into<String>) -> (Self, MockTransportHandle) {
        let state = Arc::new(Mutex::new(TransportState {
            detected: true,
            link: true,
            wireless: false,
            address: Some(Ipv4Addr::new(192, 168, 1, 50)),
            detect_latency: Duration::ZERO,
            fallback_latency: Duration::ZERO,
            fallback_failures: 0,
            detect_calls: 0,
            address_calls: 0,
            fallback: None,
            current: None,
        }));
        (
            Self {
                name: name.into(),
                state: Arc::clone(&state),
            },
            MockTransportHandle { state },
        )
    }
}

impl TransportBackend for MockTransport {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn detect(&mut self) -> Result<()> {
        let latency = {
            let mut state = self.state.lock();
            state.detect_calls += 1;
            state.detect_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.state.lock().detected {
            Ok(())
        } else {
            Err(HardwareError::not_detected(self.name.clone()))
        }
    }

    async fn link_up(&mut self) -> Result<bool> {
        let state = self.state.lock();
        if !state.detected {
            return Err(HardwareError::not_detected(self.name.clone()));
        }
        Ok(state.link)
    }

    async fn acquire_address(&mut self) -> Result<Ipv4Addr> {
        let mut state = self.state.lock();
        state.address_calls += 1;
        match state.address {
            Some(address) if state.link => {
                state.current = Some(address);
                Ok(address)
            }
            _ => Err(HardwareError::address_assignment("no lease offered")),
        }
    }

    async fn apply_fallback_address(&mut self, address: Ipv4Addr) -> Result<()> {
        let latency = self.state.lock().fallback_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        if state.fallback_failures > 0 {
            state.fallback_failures -= 1;
            return Err(HardwareError::communication("interface busy"));
        }
        state.fallback = Some(address);
        state.current = Some(address);
        Ok(())
    }

    fn local_address(&self) -> Option<Ipv4Addr> {
        self.state.lock().current
    }

    fn is_wireless(&self) -> bool {
        self.state.lock().wireless
    }
}

/// Control side of a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransportHandle {
    pub fn set_detected(&self, detected: bool) {
        self.state.lock().detected = detected;
    }

    pub fn set_link(&self, link: bool) {
        self.state.lock().link = link;
    }

    /// Report the transport as the wireless medium.
    pub fn set_wireless(&self, wireless: bool) {
        self.state.lock().wireless = wireless;
    }

    /// Address handed out by `acquire_address`; `None` makes it fail.
    pub fn set_address(&self, address: Option<Ipv4Addr>) {
        self.state.lock().address = address;
    }

    /// Make every detection take `latency`.
    pub fn set_detect_latency(&self, latency: Duration) {
        self.state.lock().detect_latency = latency;
    }

    /// Make the next `count` fallback assignments fail.
    pub fn fail_fallback(&self, count: u32) {
        self.state.lock().fallback_failures = count;
    }

    pub fn set_fallback_latency(&self, latency: Duration) {
        self.state.lock().fallback_latency = latency;
    }

    pub fn detect_calls(&self) -> u32 {
        self.state.lock().detect_calls
    }

    pub fn address_calls(&self) -> u32 {
        self.state.lock().address_calls
    }

    /// Fallback address applied by the supervisor, if any.
    pub fn fallback_address(&self) -> Option<Ipv4Addr> {
        self.state.lock().fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_hardware_fails_detection() {
        let (mut transport, handle) = MockTransport::new("eth0");
        assert!(transport.detect().await.is_ok());

        handle.set_detected(false);
        let err = transport.detect().await.unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(handle.detect_calls(), 2);
    }

    #[tokio::test]
    async fn test_address_requires_link_and_lease() {
        let (mut transport, handle) = MockTransport::new("eth0");
        assert_eq!(
            transport.acquire_address().await.unwrap(),
            Ipv4Addr::new(192, 168, 1, 50)
        );

        handle.set_address(None);
        assert!(transport.acquire_address().await.is_err());
        assert_eq!(handle.address_calls(), 2);

        let fallback = Ipv4Addr::new(192, 168, 4, 1);
        transport.apply_fallback_address(fallback).await.unwrap();
        assert_eq!(transport.local_address(), Some(fallback));
        assert_eq!(handle.fallback_address(), Some(fallback));
    }
}
