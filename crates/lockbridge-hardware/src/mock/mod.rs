//! Mock implementations for testing and development.
//!
//! These stand in for the wireless device driver, GPIO lines, the hardware
//! watchdog and the network adapter, and can be controlled programmatically
//! without physical hardware.

pub mod driver;
pub mod gpio;
pub mod transport;

// Re-export commonly used types
pub use driver::{MockLockDriver, MockLockDriverHandle};
pub use gpio::{MockGpio, MockGpioHandle, MockWatchdog, MockWatchdogHandle};
pub use transport::{MockTransport, MockTransportHandle};
