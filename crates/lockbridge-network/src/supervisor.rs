//! Transport reconnect state machine.
//!
//! One [`ReconnectSupervisor`] owns the transport bound at boot and drives it
//! through [`TransportState`]. The network task calls
//! [`supervise`](ReconnectSupervisor::supervise) periodically and acts on the
//! returned [`SupervisorAction`]; other tasks observe the state through a
//! [`watch`] channel and never block on the supervisor.
//!
//! # Valid Transitions
//!
//! - Disconnected → Connecting
//! - Connecting → Connected / DegradedFallback / Disconnected / CriticalFailure
//! - Connected → Disconnected / CriticalFailure
//! - DegradedFallback → Connected / Disconnected / CriticalFailure
//!
//! `CriticalFailure` is terminal for the boot.
//!
//! # Examples
//!
//! ```
//! use lockbridge_hardware::mock::MockTransport;
//! use lockbridge_network::supervisor::{ReconnectSupervisor, SupervisorConfig, TransportState};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> lockbridge_network::Result<()> {
//! let (transport, _handle) = MockTransport::new("eth0");
//! let mut supervisor = ReconnectSupervisor::new(transport, SupervisorConfig::default());
//!
//! supervisor.connect().await?;
//! assert_eq!(supervisor.state(), TransportState::Connected);
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use lockbridge_core::RestartReason;
use lockbridge_core::constants::RESTART_GRACE_PERIOD;
use lockbridge_hardware::TransportBackend;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{NetworkError, Result};

/// Transitions kept for diagnostics.
const MAX_HISTORY_SIZE: usize = 64;

/// Connection state of the bound transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    /// Hardware and link are up but no address could be obtained; running on
    /// the fixed fallback address.
    DegradedFallback,
    /// The hardware is missing. Nothing more is attempted this boot.
    CriticalFailure,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Disconnected => "Disconnected",
            TransportState::Connecting => "Connecting",
            TransportState::Connected => "Connected",
            TransportState::DegradedFallback => "DegradedFallback",
            TransportState::CriticalFailure => "CriticalFailure",
        };
        f.write_str(name)
    }
}

impl TransportState {
    pub fn can_transition_to(&self, target: &TransportState) -> bool {
        matches!(
            (self, target),
            (TransportState::Disconnected, TransportState::Connecting)
                | (
                    TransportState::Connecting,
                    TransportState::Connected
                        | TransportState::DegradedFallback
                        | TransportState::Disconnected
                        | TransportState::CriticalFailure
                )
                | (
                    TransportState::Connected,
                    TransportState::Disconnected | TransportState::CriticalFailure
                )
                | (
                    TransportState::DegradedFallback,
                    TransportState::Connected
                        | TransportState::Disconnected
                        | TransportState::CriticalFailure
                )
        )
    }

    /// Whether traffic can flow, possibly on the fallback address.
    pub fn is_up(&self) -> bool {
        matches!(
            self,
            TransportState::Connected | TransportState::DegradedFallback
        )
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTransition {
    pub from: TransportState,
    pub to: TransportState,
    pub timestamp: Instant,
}

/// What the network task must do after a supervisor step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    None,
    /// Record the reason and reboot.
    Restart(RestartReason),
    /// Select the wireless transport in the preferences, record
    /// [`RestartReason::NetworkDeviceCriticalFailure`] and reboot.
    FallBackToWifi,
    /// No transport is usable and no fallback is left. Record the reason but
    /// stay up until an operator intervenes.
    OperatorRequired(RestartReason),
}

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Bound on every single transport call.
    pub detect_timeout: Duration,
    /// Additional address attempts after the first one.
    pub address_retries: u32,
    pub address_retry_delay: Duration,
    pub fallback_address: Ipv4Addr,
    /// Reboot on link loss once the grace period is over.
    pub restart_on_disconnect: bool,
    /// Uptime before restart policies apply.
    pub grace_period: Duration,
    /// Reboot after being disconnected this long; `None` disables it.
    pub network_timeout: Option<Duration>,
    /// Fall back to the wireless transport if wired hardware is missing.
    pub wifi_fallback: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            detect_timeout: Duration::from_secs(5),
            address_retries: 3,
            address_retry_delay: Duration::from_secs(1),
            fallback_address: Ipv4Addr::new(192, 168, 4, 1),
            restart_on_disconnect: false,
            grace_period: RESTART_GRACE_PERIOD,
            network_timeout: None,
            wifi_fallback: true,
        }
    }
}

impl SupervisorConfig {
    pub fn detect_timeout(mut self, timeout: Duration) -> Self {
        self.detect_timeout = timeout;
        self
    }

    pub fn address_retries(mut self, retries: u32) -> Self {
        self.address_retries = retries;
        self
    }

    pub fn address_retry_delay(mut self, delay: Duration) -> Self {
        self.address_retry_delay = delay;
        self
    }

    pub fn fallback_address(mut self, address: Ipv4Addr) -> Self {
        self.fallback_address = address;
        self
    }

    pub fn restart_on_disconnect(mut self, enabled: bool) -> Self {
        self.restart_on_disconnect = enabled;
        self
    }

    pub fn network_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.network_timeout = timeout;
        self
    }

    pub fn wifi_fallback(mut self, enabled: bool) -> Self {
        self.wifi_fallback = enabled;
        self
    }
}

/// Outcome of one bounded transport call.
enum Step<T> {
    Done(T),
    Missing,
    Failed,
}

/// Reconnect state machine over one transport.
pub struct ReconnectSupervisor<T: TransportBackend> {
    transport: T,
    config: SupervisorConfig,
    state: TransportState,
    state_tx: watch::Sender<TransportState>,
    history: VecDeque<TransportTransition>,
    started_at: Instant,
    disconnected_since: Option<Instant>,
    reconnects: u32,
}

impl<T: TransportBackend> ReconnectSupervisor<T> {
    pub fn new(transport: T, config: SupervisorConfig) -> Self {
        let now = Instant::now();
        let (state_tx, _) = watch::channel(TransportState::Disconnected);
        Self {
            transport,
            config,
            state: TransportState::Disconnected,
            state_tx,
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
            started_at: now,
            disconnected_since: Some(now),
            reconnects: 0,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Follow state changes from another task.
    pub fn subscribe(&self) -> watch::Receiver<TransportState> {
        self.state_tx.subscribe()
    }

    pub fn history(&self) -> &VecDeque<TransportTransition> {
        &self.history
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Times the link was lost since boot.
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Move to `new_state`, rejecting transitions the machine does not allow.
    ///
    /// # Errors
    ///
    /// [`NetworkError::InvalidStateTransition`] for a disallowed transition.
    pub fn transition_to(&mut self, new_state: TransportState) -> Result<TransportTransition> {
        if !self.state.can_transition_to(&new_state) {
            return Err(NetworkError::InvalidStateTransition {
                from: self.state.to_string(),
                to: new_state.to_string(),
            });
        }

        let transition = TransportTransition {
            from: self.state,
            to: new_state,
            timestamp: Instant::now(),
        };
        info!("Transport {}: {} -> {}", self.transport.name(), self.state, new_state);

        match new_state {
            TransportState::Connected | TransportState::DegradedFallback => {
                self.disconnected_since = None;
            }
            TransportState::Disconnected => {
                self.disconnected_since.get_or_insert(transition.timestamp);
            }
            TransportState::Connecting | TransportState::CriticalFailure => {}
        }

        self.state = new_state;
        if self.history.len() == MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(transition);
        self.state_tx.send_replace(new_state);
        Ok(transition)
    }

    /// Bring the transport up from `Disconnected`.
    ///
    /// Does nothing in any other state.
    pub async fn connect(&mut self) -> Result<SupervisorAction> {
        if self.state != TransportState::Disconnected {
            return Ok(SupervisorAction::None);
        }
        self.transition_to(TransportState::Connecting)?;

        let timeout = self.config.detect_timeout;
        match bounded(timeout, self.transport.detect()).await {
            Step::Done(()) => {}
            Step::Missing => return self.enter_critical_failure(),
            Step::Failed => {
                self.transition_to(TransportState::Disconnected)?;
                return Ok(SupervisorAction::None);
            }
        }

        match bounded(timeout, self.transport.link_up()).await {
            Step::Done(true) => {}
            Step::Missing => return self.enter_critical_failure(),
            Step::Done(false) | Step::Failed => {
                info!("Transport {} has no link", self.transport.name());
                self.transition_to(TransportState::Disconnected)?;
                return Ok(SupervisorAction::None);
            }
        }

        let attempts = self.config.address_retries.saturating_add(1);
        for attempt in 1..=attempts {
            match bounded(timeout, self.transport.acquire_address()).await {
                Step::Done(address) => {
                    info!("Transport {} up with address {}", self.transport.name(), address);
                    self.transition_to(TransportState::Connected)?;
                    return Ok(SupervisorAction::None);
                }
                Step::Missing => return self.enter_critical_failure(),
                Step::Failed if attempt < attempts => {
                    tokio::time::sleep(self.config.address_retry_delay).await;
                }
                Step::Failed => {}
            }
        }

        let fallback = self.config.fallback_address;
        warn!(
            "No address after {} attempts, falling back to {}",
            attempts, fallback
        );
        match bounded(timeout, self.transport.apply_fallback_address(fallback)).await {
            Step::Done(()) => {
                self.transition_to(TransportState::DegradedFallback)?;
            }
            Step::Missing => return self.enter_critical_failure(),
            Step::Failed => {
                self.transition_to(TransportState::Disconnected)?;
            }
        }
        Ok(SupervisorAction::None)
    }

    /// One periodic supervision step.
    pub async fn supervise(&mut self) -> Result<SupervisorAction> {
        match self.state {
            TransportState::CriticalFailure | TransportState::Connecting => {
                Ok(SupervisorAction::None)
            }
            TransportState::Disconnected => {
                if let Some(action) = self.check_network_timeout() {
                    return Ok(action);
                }
                self.connect().await
            }
            TransportState::Connected | TransportState::DegradedFallback => {
                match bounded(self.config.detect_timeout, self.transport.link_up()).await {
                    Step::Done(true) => Ok(SupervisorAction::None),
                    Step::Missing => self.enter_critical_failure(),
                    Step::Done(false) | Step::Failed => self.on_link_lost(),
                }
            }
        }
    }

    /// Cycle the transport after the broker session exhausted its reconnect
    /// budget.
    pub async fn force_reconnect(&mut self) -> Result<SupervisorAction> {
        if self.state.is_up() {
            warn!("Cycling transport {}", self.transport.name());
            self.transition_to(TransportState::Disconnected)?;
        }
        self.connect().await
    }

    fn on_link_lost(&mut self) -> Result<SupervisorAction> {
        self.reconnects += 1;
        warn!("Transport {} lost link", self.transport.name());
        self.transition_to(TransportState::Disconnected)?;

        if self.config.restart_on_disconnect && self.uptime() > self.config.grace_period {
            return Ok(SupervisorAction::Restart(
                RestartReason::RestartOnDisconnectWatchdog,
            ));
        }
        Ok(SupervisorAction::None)
    }

    fn check_network_timeout(&self) -> Option<SupervisorAction> {
        let timeout = self.config.network_timeout?;
        let since = self.disconnected_since?;
        (self.uptime() > self.config.grace_period && since.elapsed() > timeout).then(|| {
            warn!("Network down for more than {:?}", timeout);
            SupervisorAction::Restart(RestartReason::NetworkTimeoutWatchdog)
        })
    }

    fn enter_critical_failure(&mut self) -> Result<SupervisorAction> {
        error!("Network hardware {} not detected", self.transport.name());
        self.transition_to(TransportState::CriticalFailure)?;

        if self.config.wifi_fallback && !self.transport.is_wireless() {
            Ok(SupervisorAction::FallBackToWifi)
        } else {
            Ok(SupervisorAction::OperatorRequired(
                RestartReason::NetworkDeviceCriticalFailureNoWifiFallback,
            ))
        }
    }
}

/// Run one transport call under `timeout`, classifying the outcome.
async fn bounded<V>(
    timeout: Duration,
    call: impl Future<Output = lockbridge_hardware::Result<V>>,
) -> Step<V> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Step::Done(value),
        Ok(Err(e)) if e.is_permanent() => Step::Missing,
        Ok(Err(e)) => {
            warn!("Transport call failed: {}", e);
            Step::Failed
        }
        Err(_) => {
            warn!("Transport call timed out after {:?}", timeout);
            Step::Failed
        }
    }
}
