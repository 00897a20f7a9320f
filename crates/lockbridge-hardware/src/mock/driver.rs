//! Mock lock driver for testing and development.
//!
//! The mock replays scripted command results and lets tests inject driver
//! events through a [`MockLockDriverHandle`]. It also records how many
//! commands were in flight at the same time, which tests use to check that
//! callers never overlap commands on one driver.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use lockbridge_core::{Action, CmdResult, DeviceKind, StateQuery};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::traits::{DriverEvent, LockDriver};
use crate::types::DeviceInfo;
use crate::{HardwareError, Result};

#[derive(Debug)]
struct DriverState {
    scripted: Mutex<VecDeque<CmdResult>>,
    fallback: Mutex<CmdResult>,
    commands: Mutex<Vec<Action>>,
    config_writes: Mutex<Vec<(String, serde_json::Value)>>,
    queries: Mutex<Vec<StateQuery>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    paired: AtomicBool,
    credential: AtomicBool,
}

impl DriverState {
    fn new() -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(CmdResult::Success),
            commands: Mutex::new(Vec::new()),
            config_writes: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            paired: AtomicBool::new(true),
            credential: AtomicBool::new(true),
        }
    }

    async fn attempt(&self) -> CmdResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let result = self
            .scripted
            .lock()
            .pop_front()
            .unwrap_or(*self.fallback.lock());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Mock lock or opener driver.
///
/// # Examples
///
/// ```
/// use lockbridge_core::{Action, CmdResult, DeviceKind, LockAction};
/// use lockbridge_hardware::mock::MockLockDriver;
/// use lockbridge_hardware::traits::LockDriver;
///
/// #[tokio::main]
/// async fn main() {
///     let (mut driver, handle) = MockLockDriver::new(DeviceKind::Lock);
///     handle.script_results([CmdResult::Failed]);
///
///     let action = Action::Lock(LockAction::Unlock);
///     assert_eq!(driver.send_command(action).await, CmdResult::Failed);
///     assert_eq!(driver.send_command(action).await, CmdResult::Success);
///     assert_eq!(handle.commands().len(), 2);
/// }
/// ```
#[derive(Debug)]
pub struct MockLockDriver {
    kind: DeviceKind,
    name: String,
    event_rx: mpsc::Receiver<DriverEvent>,
    state: Arc<DriverState>,
}

impl MockLockDriver {
    /// Create a new mock driver for `kind`.
    ///
    /// The driver starts paired, with a credential configured, and answers
    /// every command with [`CmdResult::Success`] unless scripted otherwise.
    pub fn new(kind: DeviceKind) -> (Self, MockLockDriverHandle) {
        let (event_tx, event_rx) = mpsc::channel(32);
        let state = Arc::new(DriverState::new());

        let driver = Self {
            kind,
            name: format!("Mock {kind}"),
            event_rx,
            state: Arc::clone(&state),
        };

        (driver, MockLockDriverHandle { event_tx, state })
    }
}

impl LockDriver for MockLockDriver {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    async fn next_event(&mut self) -> Result<DriverEvent> {
        self.event_rx
            .recv()
            .await
            .ok_or_else(|| HardwareError::disconnected("Mock driver event channel closed"))
    }

    async fn send_command(&mut self, action: Action) -> CmdResult {
        self.state.commands.lock().push(action);
        self.state.attempt().await
    }

    async fn set_config(&mut self, field: &str, value: &serde_json::Value) -> CmdResult {
        self.state
            .config_writes
            .lock()
            .push((field.to_string(), value.clone()));
        self.state.attempt().await
    }

    async fn request_update(&mut self, query: StateQuery) -> CmdResult {
        self.state.queries.lock().push(query);
        CmdResult::Success
    }

    fn is_paired(&self) -> bool {
        self.state.paired.load(Ordering::SeqCst)
    }

    fn has_credential_configured(&self) -> bool {
        self.state.credential.load(Ordering::SeqCst)
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo::new(self.name.clone(), "Mock Driver v1.0").with_firmware_version("1.0.0")
    }
}

/// Handle for controlling a [`MockLockDriver`]. Cloneable.
#[derive(Debug, Clone)]
pub struct MockLockDriverHandle {
    event_tx: mpsc::Sender<DriverEvent>,
    state: Arc<DriverState>,
}

impl MockLockDriverHandle {
    /// Deliver an event to the driver.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver has been dropped.
    pub async fn emit(&self, event: DriverEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| HardwareError::disconnected("Mock driver event channel closed"))
    }

    /// Queue results returned by the next attempts, in order.
    pub fn script_results(&self, results: impl IntoIterator<Item = CmdResult>) {
        self.state.scripted.lock().extend(results);
    }

    /// Result returned once the script is exhausted.
    pub fn set_fallback_result(&self, result: CmdResult) {
        *self.state.fallback.lock() = result;
    }

    /// Make every attempt take `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock() = latency;
    }

    pub fn set_paired(&self, paired: bool) {
        self.state.paired.store(paired, Ordering::SeqCst);
    }

    pub fn set_credential_configured(&self, configured: bool) {
        self.state.credential.store(configured, Ordering::SeqCst);
    }

    /// Every action attempt so far, retries included.
    pub fn commands(&self) -> Vec<Action> {
        self.state.commands.lock().clone()
    }

    /// Every configuration write attempt so far.
    pub fn config_writes(&self) -> Vec<(String, serde_json::Value)> {
        self.state.config_writes.lock().clone()
    }

    /// Every update requested so far.
    pub fn queries(&self) -> Vec<StateQuery> {
        self.state.queries.lock().clone()
    }

    /// Highest number of attempts observed running at the same time.
    pub fn max_concurrent_commands(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}
