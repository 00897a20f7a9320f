//! Hardware traits.
//!
//! The async traits use return-position `impl Future + Send` so that generic
//! code built on them can be spawned on the multi-threaded Tokio runtime.
//! Implementations are free to write the methods as plain `async fn`.
//!
//! They are not object-safe; concrete dispatch goes through the enums in
//! [`crate::devices`]. The synchronous [`GpioController`] and [`Watchdog`]
//! traits are object-safe and are shared as `Arc<dyn ...>`.

use std::future::Future;
use std::net::Ipv4Addr;

use lockbridge_core::{
    Action, AuthorizationEntry, CmdResult, DeviceKind, DeviceSnapshot, KeypadCode, LogEntry,
    StateQuery, TimeControlEntry,
};

use crate::Result;
use crate::types::{DeviceInfo, PinId};

/// Something the device driver reports without being asked.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// A fresh state reading.
    StateChanged(DeviceSnapshot),
    /// A batch of historical log entries, newest first or in any order.
    LogEntries(Vec<LogEntry>),
    KeypadCodes(Vec<KeypadCode>),
    TimeControl(Vec<TimeControlEntry>),
    Authorizations(Vec<AuthorizationEntry>),
}

/// The wireless device driver of one lock or opener.
///
/// The driver is not reentrant: callers must not start a command while
/// another one on the same driver is still running.
pub trait LockDriver: Send {
    fn kind(&self) -> DeviceKind;

    /// Wait for the next unsolicited event.
    ///
    /// Must be cancel safe: dropping the future before it completes loses no
    /// event.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::Disconnected`](crate::HardwareError::Disconnected)
    /// once the driver has shut down.
    fn next_event(&mut self) -> impl Future<Output = Result<DriverEvent>> + Send;

    /// Send one action to the device. One attempt, no retries.
    fn send_command(&mut self, action: Action) -> impl Future<Output = CmdResult> + Send;

    /// Write one configuration field. One attempt, no retries.
    fn set_config(
        &mut self,
        field: &str,
        value: &serde_json::Value,
    ) -> impl Future<Output = CmdResult> + Send;

    /// Ask the device to report `query` again.
    ///
    /// The answer arrives later through [`next_event`](Self::next_event).
    fn request_update(&mut self, query: StateQuery) -> impl Future<Output = CmdResult> + Send;

    fn is_paired(&self) -> bool;

    /// Whether a security PIN for the device is stored in the driver.
    fn has_credential_configured(&self) -> bool;

    fn info(&self) -> DeviceInfo;
}

/// Physical network medium behind the broker session.
///
/// All backends share this contract so that the reconnect state machine
/// does not depend on the concrete adapter.
pub trait TransportBackend: Send {
    /// Short name for logs and the maintenance topic.
    fn name(&self) -> String;

    /// Check that the hardware is present.
    ///
    /// # Errors
    ///
    /// [`HardwareError::NotDetected`](crate::HardwareError::NotDetected) when it
    /// is not. Other errors are transient.
    fn detect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Whether the physical link (carrier or association) is up.
    fn link_up(&mut self) -> impl Future<Output = Result<bool>> + Send;

    /// Obtain a static or leased address.
    fn acquire_address(&mut self) -> impl Future<Output = Result<Ipv4Addr>> + Send;

    /// Fall back to a fixed private address.
    fn apply_fallback_address(
        &mut self,
        address: Ipv4Addr,
    ) -> impl Future<Output = Result<()>> + Send;

    fn local_address(&self) -> Option<Ipv4Addr>;

    /// Whether this is the wireless fallback medium.
    fn is_wireless(&self) -> bool {
        false
    }

    /// Signal strength in dBm, for wireless backends.
    fn signal_strength(&self) -> Option<i32> {
        None
    }
}

/// Drives GPIO output lines.
pub trait GpioController: Send + Sync {
    /// Drive `pin` high or low.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be written.
    fn set_level(&self, pin: PinId, high: bool) -> Result<()>;
}

/// Liveness timer that reboots the host if not fed in time.
pub trait Watchdog: Send + Sync {
    fn feed(&self);
}
