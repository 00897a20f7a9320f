//! Hardware abstraction layer for the lockbridge gateway.
//!
//! This crate provides trait-based abstractions for everything the bridge
//! touches below the broker session: the wireless device driver, GPIO
//! indicator lines, the hardware watchdog and the network adapters. Mock
//! implementations of each let the bridge run and be tested without hardware.
//!
//! # Design
//!
//! - **Async-first**: driver and transport operations are asynchronous,
//!   using native `async fn` in traits (Edition 2024 RPITIT).
//! - **Enum dispatch**: the async traits are not object-safe, so
//!   [`devices::AnyLockDriver`] and [`devices::AnyTransport`] provide
//!   concrete dispatch.
//! - **Object-safe side effects**: [`GpioController`] and [`Watchdog`] are
//!   synchronous and shared as `Arc<dyn ...>`.
//!
//! # Device Driver
//!
//! ```no_run
//! use lockbridge_hardware::traits::{DriverEvent, LockDriver};
//! use lockbridge_hardware::Result;
//!
//! async fn wait_for_state<D: LockDriver>(driver: &mut D) -> Result<()> {
//!     loop {
//!         if let DriverEvent::StateChanged(snapshot) = driver.next_event().await? {
//!             println!("state: {}", snapshot.lock_state);
//!             return Ok(());
//!         }
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T>`][error::Result] with
//! [`HardwareError`]. A missing adapter is reported as
//! [`HardwareError::NotDetected`], distinct from a detected adapter without
//! link or address.

pub mod devices;
pub mod error;
pub mod gpio;
pub mod mock;
pub mod traits;
pub mod transport;
pub mod types;

// Re-export commonly used types for convenience
pub use error::{HardwareError, Result};
pub use traits::{DriverEvent, GpioController, LockDriver, TransportBackend, Watchdog};
pub use types::{DeviceInfo, GpioRoleTable, HardwareId, PinAssignment, PinId, PinRole};
