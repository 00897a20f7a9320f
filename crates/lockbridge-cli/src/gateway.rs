//! Gateway runtime.
//!
//! [`run`] wires the crates together and runs three kinds of tasks:
//!
//! - the network task (this function's loop): owns the
//!   [`ReconnectSupervisor`], receives the broker session events and feeds
//!   inbound messages to the [`CommandRouter`]
//! - one [`DeviceWorker`] task per configured device
//! - the [`Telemetry`] task, which publishes the maintenance topics
//! - the [`WatchdogFeeder`], which feeds the hardware watchdog while the
//!   network task and every worker keep beating their heartbeats
//!
//! The network task never awaits the broker client: subscriptions are
//! registered before the session starts and the router only uses
//! non-blocking calls, so the session can always hand over its next event.
//!
//! A supervisor decision to restart is recorded in the restart region and
//! returned as [`Exit::Restart`]; the service manager starts the gateway
//! again.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use lockbridge_bridge::heartbeat::HEARTBEAT_INTERVAL;
use lockbridge_bridge::retry::{RetryExecutor, RetryPolicy};
use lockbridge_bridge::{
    AccessController, CommandRouter, DeviceWorker, RouteOutcome, WatchdogFeeder, WorkerConfig,
};
use lockbridge_core::constants::*;
use lockbridge_core::{DeviceKind, DeviceSnapshot, LockState, RestartReason, TopicPath, Trigger};
use lockbridge_hardware::devices::{AnyLockDriver, AnyTransport};
use lockbridge_hardware::gpio::{DeviceWatchdog, DisabledWatchdog, NoGpio, SysfsGpio};
use lockbridge_hardware::mock::{MockLockDriver, MockLockDriverHandle};
use lockbridge_hardware::transport::{InterfaceConfig, SysfsTransport};
use lockbridge_hardware::{DriverEvent, GpioController, TransportBackend, Watchdog};
use lockbridge_network::mqtt::{self, SessionEvent};
use lockbridge_network::{BrokerClient, ReconnectSupervisor, SupervisorAction, TransportState};
use lockbridge_storage::preferences::KEY_NETWORK_HARDWARE;
use lockbridge_storage::{
    BootReport, Database, DatabaseConfig, FileRegion, PreferenceStore, RestartSupervisor,
    RetainedRegion,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;

const SESSION_EVENT_CAPACITY: usize = 64;
const TELEMETRY_INTERVAL: Duration = Duration::from_secs(30);
const WATCHDOG_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Why the gateway stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Shutdown,
    /// The reason has been recorded; the process should be restarted.
    Restart(RestartReason),
}

/// Act on a supervisor decision.
///
/// Returns the exit to take, or `None` to keep running.
pub async fn handle_supervisor_action<R: RetainedRegion>(
    action: SupervisorAction,
    restarts: &RestartSupervisor<R>,
    preferences: &PreferenceStore,
) -> anyhow::Result<Option<Exit>> {
    match action {
        SupervisorAction::None => Ok(None),
        SupervisorAction::Restart(reason) => {
            warn!("Restarting: {}", reason);
            restarts.record_reason(reason)?;
            Ok(Some(Exit::Restart(reason)))
        }
        SupervisorAction::FallBackToWifi => {
            warn!("Network hardware missing, switching to Wi-Fi");
            preferences.put_string(KEY_NETWORK_HARDWARE, "wifi").await?;
            let reason = RestartReason::NetworkDeviceCriticalFailure;
            restarts.record_reason(reason)?;
            Ok(Some(Exit::Restart(reason)))
        }
        // nothing is recorded: the gateway keeps running, and a stale record
        // would be read as the reason of the next unrelated restart
        SupervisorAction::OperatorRequired(reason) => {
            error!("Network unusable ({}), operator intervention required", reason);
            Ok(None)
        }
    }
}

/// Supervisor action asked for by a routed message.
pub fn action_for_route(outcome: &RouteOutcome) -> SupervisorAction {
    match outcome {
        RouteOutcome::RestartRequested => SupervisorAction::Restart(RestartReason::RequestedViaMqtt),
        _ => SupervisorAction::None,
    }
}

/// A failed supervision step is logged; the next tick tries again.
fn logged(step: &str, result: lockbridge_network::Result<SupervisorAction>) -> SupervisorAction {
    result.unwrap_or_else(|e| {
        warn!("Network {} failed: {}", step, e);
        SupervisorAction::None
    })
}

/// Publishes the maintenance topics of the gateway.
pub struct Telemetry<B, R> {
    broker: B,
    base: TopicPath,
    started: Instant,
    network: watch::Receiver<TransportState>,
    network_device: String,
    restarts: Arc<RestartSupervisor<R>>,
    last_reason: Option<RestartReason>,
    stable: bool,
}

impl<B: BrokerClient, R: RetainedRegion> Telemetry<B, R> {
    pub fn new(
        broker: B,
        base: TopicPath,
        network: watch::Receiver<TransportState>,
        network_device: String,
        restarts: Arc<RestartSupervisor<R>>,
        boot: &BootReport,
    ) -> Self {
        Self {
            broker,
            base,
            started: Instant::now(),
            network,
            network_device,
            restarts,
            last_reason: boot.last_reason,
            stable: false,
        }
    }

    pub async fn run(mut self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.publish().await {
                debug!("Telemetry not published: {}", e);
            }
        }
    }

    /// Publish every maintenance topic once.
    pub async fn publish(&mut self) -> anyhow::Result<()> {
        let uptime = self.started.elapsed();
        if !self.stable && uptime >= self.restarts.policy().stable_uptime {
            info!("Boot stable after {:?}, clearing bootloop counter", uptime);
            self.restarts.clear_bootloop_counter()?;
            self.stable = true;
        }

        let reason = self
            .last_reason
            .unwrap_or(RestartReason::NotApplicable)
            .to_string();
        let network = format!("{} ({})", self.network_device, *self.network.borrow());
        let mqtt_state = if self.broker.is_connected() {
            PAYLOAD_ONLINE
        } else {
            PAYLOAD_OFFLINE
        };

        let topics = [
            (TOPIC_MAINTENANCE_UPTIME, (uptime.as_secs() / 60).to_string()),
            (TOPIC_MAINTENANCE_RESTART_REASON, reason),
            (TOPIC_MAINTENANCE_NETWORK_DEVICE, network),
            (TOPIC_MAINTENANCE_MQTT_STATE, mqtt_state.to_string()),
            (
                TOPIC_MAINTENANCE_BOOTLOOP_COUNTER,
                self.restarts.bootloop_counter()?.to_string(),
            ),
        ];
        for (suffix, payload) in topics {
            self.broker
                .publish_retained(&self.base.join(suffix)?, payload)
                .await?;
        }
        Ok(())
    }
}

fn build_transport(config: &BridgeConfig) -> AnyTransport {
    let network = &config.network;
    let mut interface = InterfaceConfig::new(network.hardware).static_address(network.static_address);
    if let Some(name) = &network.interface {
        interface = interface.interface(name.clone());
    }
    let transport = SysfsTransport::new(interface);
    if network.hardware.is_wireless() {
        AnyTransport::Wifi(transport)
    } else {
        AnyTransport::Ethernet(transport)
    }
}

fn build_gpio(config: &BridgeConfig) -> anyhow::Result<Arc<dyn GpioController>> {
    if config.gpio.pins.assignments().is_empty() {
        return Ok(Arc::new(NoGpio));
    }
    Ok(Arc::new(SysfsGpio::open(&config.gpio.pins)?))
}

fn build_watchdog(config: &BridgeConfig) -> anyhow::Result<Arc<dyn Watchdog>> {
    match &config.gpio.watchdog {
        Some(path) => Ok(Arc::new(DeviceWatchdog::open(path)?)),
        None => Ok(Arc::new(DisabledWatchdog)),
    }
}

/// Simulated device used until a BLE driver binding exists. Reports one
/// locked state at start.
async fn simulated_driver(kind: DeviceKind) -> anyhow::Result<(AnyLockDriver, MockLockDriverHandle)> {
    let (driver, handle) = MockLockDriver::new(kind);
    let snapshot = DeviceSnapshot {
        lock_state: LockState::Locked,
        trigger: Trigger::System,
        ..DeviceSnapshot::undefined(kind)
    };
    handle.emit(DriverEvent::StateChanged(snapshot)).await?;
    Ok((AnyLockDriver::Mock(driver), handle))
}

/// Run the gateway until shutdown or a restart decision.
pub async fn run(mut config: BridgeConfig) -> anyhow::Result<Exit> {
    let db = Database::new(DatabaseConfig::new(config.storage.database.clone()))
        .await
        .context("cannot open preference database")?;
    let preferences = PreferenceStore::new(&db);

    let restarts = Arc::new(RestartSupervisor::new(
        FileRegion::new(&config.storage.restart_record),
        config.restart.policy(),
    ));
    let boot = restarts.boot()?;
    if boot.bootloop_detected {
        restarts.recover_from_bootloop(&preferences).await?;
    }
    config.apply_preferences(&preferences).await?;

    let access = Arc::new(AccessController::new(preferences.load_acl().await?));
    let gpio = build_gpio(&config)?;
    let watchdog = build_watchdog(&config)?;
    let mut feeder = WatchdogFeeder::new(Arc::clone(&watchdog), config.gpio.stall_limit());
    let network_heartbeat = feeder.register("network");

    let mut supervisor = ReconnectSupervisor::new(build_transport(&config), config.supervisor_config());
    let network_device = supervisor.transport().name();
    info!("Network hardware: {}", network_device);
    let action = logged("connect", supervisor.connect().await);
    if let Some(exit) = handle_supervisor_action(action, &restarts, &preferences).await? {
        return Ok(exit);
    }

    let (broker, session) = mqtt::connect(config.mqtt_config()?);
    let mut router = CommandRouter::new(broker.clone(), Arc::clone(&access))
        .with_maintenance(config.base_topic()?);
    let mut workers = JoinSet::new();
    let mut simulated = Vec::new();
    let policy = RetryPolicy::new(config.retry.max_retries, config.retry.retry_delay_ms)
        .with_role_table(&config.gpio.pins);

    for device in &config.devices {
        let (driver, handle) = simulated_driver(device.kind).await?;
        simulated.push(handle);
        info!(
            "Starting {} device {}",
            device.kind,
            device.name.as_deref().unwrap_or(device.kind.as_str())
        );

        let executor = RetryExecutor::new(policy.clone(), Arc::clone(&gpio), Arc::clone(&watchdog));
        let mut worker_config = WorkerConfig::new(
            config.device_topic(device)?,
            device
                .unique_id
                .clone()
                .unwrap_or_else(|| device.kind.as_str().to_string()),
        )
        .queue_capacity(config.retry.queue_capacity);
        if let Some(root) = config.discovery_root()? {
            worker_config = worker_config.discovery_root(root);
        }

        let (worker, route) =
            DeviceWorker::new(driver, broker.clone(), Arc::clone(&access), executor, worker_config);
        let mut worker = worker
            .with_preferences(preferences.clone())
            .with_heartbeat(feeder.register(device.kind.as_str()));
        worker.restore_entity_counts().await?;
        router.add_device(route);

        let kind = device.kind;
        workers.spawn(async move { (kind, worker.run().await) });
    }

    let telemetry = Telemetry::new(
        broker.clone(),
        config.base_topic()?,
        supervisor.subscribe(),
        network_device,
        Arc::clone(&restarts),
        &boot,
    );
    tokio::spawn(telemetry.run(TELEMETRY_INTERVAL));
    tokio::spawn(feeder.run(WATCHDOG_CHECK_INTERVAL));

    // the session restores these on every ConnAck
    router.subscribe_all().await?;
    let (events_tx, mut events) = mpsc::channel(SESSION_EVENT_CAPACITY);
    tokio::spawn(session.run(events_tx));

    let mut supervise =
        tokio::time::interval(Duration::from_secs(config.network.supervise_interval_secs.max(1)));
    supervise.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut idle = tokio::time::interval(HEARTBEAT_INTERVAL);
    idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        network_heartbeat.beat();
        let action = tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    anyhow::bail!("broker session ended");
                };
                match event {
                    SessionEvent::Connected => {
                        router.announce_all();
                        router.resync_all();
                        SupervisorAction::None
                    }
                    SessionEvent::Disconnected => {
                        warn!("Broker session lost");
                        SupervisorAction::None
                    }
                    SessionEvent::Message(message) => match router.route(&message) {
                        Ok(outcome) => action_for_route(&outcome),
                        Err(e) => {
                            warn!("Failed to handle message on {}: {}", message.topic, e);
                            SupervisorAction::None
                        }
                    },
                    SessionEvent::ReconnectBudgetExhausted => {
                        warn!("Broker unreachable, cycling the network transport");
                        logged("reconnect", supervisor.force_reconnect().await)
                    }
                }
            }
            _ = supervise.tick() => logged("supervision", supervisor.supervise().await),
            _ = idle.tick() => SupervisorAction::None,
            Some(joined) = workers.join_next() => {
                match joined {
                    Ok((kind, Ok(()))) => info!("{} worker finished", kind),
                    Ok((kind, Err(e))) => error!("{} worker failed: {}", kind, e),
                    Err(e) => error!("Device task panicked: {}", e),
                }
                SupervisorAction::None
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                drop(simulated);
                return Ok(Exit::Shutdown);
            }
        };

        if let Some(exit) = handle_supervisor_action(action, &restarts, &preferences).await? {
            return Ok(exit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbridge_network::mock::MockBroker;
    use lockbridge_storage::{BootloopPolicy, MemoryRegion};
    use rstest::rstest;

    async fn preferences() -> PreferenceStore {
        let db = Database::in_memory().await.unwrap();
        PreferenceStore::new(&db)
    }

    fn restarts() -> RestartSupervisor<MemoryRegion> {
        RestartSupervisor::new(MemoryRegion::new(), BootloopPolicy::default())
    }

    #[tokio::test]
    async fn test_restart_is_recorded_before_exit() {
        let preferences = preferences().await;
        let restarts = restarts();

        let exit = handle_supervisor_action(
            SupervisorAction::Restart(RestartReason::NetworkTimeoutWatchdog),
            &restarts,
            &preferences,
        )
        .await
        .unwrap();

        assert_eq!(exit, Some(Exit::Restart(RestartReason::NetworkTimeoutWatchdog)));
        assert_eq!(
            restarts.read_last_reason().unwrap(),
            Some(RestartReason::NetworkTimeoutWatchdog)
        );
    }

    #[tokio::test]
    async fn test_fallback_selects_wifi() {
        let preferences = preferences().await;
        let restarts = restarts();

        let exit = handle_supervisor_action(SupervisorAction::FallBackToWifi, &restarts, &preferences)
            .await
            .unwrap();

        assert_eq!(
            exit,
            Some(Exit::Restart(RestartReason::NetworkDeviceCriticalFailure))
        );
        assert_eq!(
            preferences.get_string(KEY_NETWORK_HARDWARE).await.unwrap().as_deref(),
            Some("wifi")
        );
    }

    #[tokio::test]
    async fn test_operator_required_keeps_running() {
        let preferences = preferences().await;
        let restarts = restarts();
        let reason = RestartReason::NetworkDeviceCriticalFailureNoWifiFallback;

        let exit = handle_supervisor_action(
            SupervisorAction::OperatorRequired(reason),
            &restarts,
            &preferences,
        )
        .await
        .unwrap();

        assert_eq!(exit, None);
        assert_eq!(restarts.read_last_reason().unwrap(), None);

        // a later crash must not be reported as this reason
        let report = restarts.boot().unwrap();
        assert_eq!(report.last_reason, None);
    }

    #[rstest]
    #[case(RouteOutcome::RestartRequested, SupervisorAction::Restart(RestartReason::RequestedViaMqtt))]
    #[case(RouteOutcome::Replay, SupervisorAction::None)]
    #[case(RouteOutcome::Echo, SupervisorAction::None)]
    #[case(RouteOutcome::Unrouted, SupervisorAction::None)]
    fn test_restart_request_maps_to_restart(
        #[case] outcome: RouteOutcome,
        #[case] expected: SupervisorAction,
    ) {
        assert_eq!(action_for_route(&outcome), expected);
    }

    #[tokio::test]
    async fn test_requested_restart_is_recorded() {
        let preferences = preferences().await;
        let restarts = restarts();

        let exit = handle_supervisor_action(
            action_for_route(&RouteOutcome::RestartRequested),
            &restarts,
            &preferences,
        )
        .await
        .unwrap();

        assert_eq!(exit, Some(Exit::Restart(RestartReason::RequestedViaMqtt)));
        assert_eq!(
            restarts.read_last_reason().unwrap(),
            Some(RestartReason::RequestedViaMqtt)
        );
    }

    #[test]
    fn test_failed_supervision_step_keeps_running() {
        let failed = logged("supervision", Err(lockbridge_network::NetworkError::NotConnected));
        assert_eq!(failed, SupervisorAction::None);
    }

    #[tokio::test]
    async fn test_none_does_nothing() {
        let preferences = preferences().await;
        let restarts = restarts();
        let exit = handle_supervisor_action(SupervisorAction::None, &restarts, &preferences)
            .await
            .unwrap();
        assert_eq!(exit, None);
        assert_eq!(restarts.read_last_reason().unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_topics() {
        let broker = MockBroker::new();
        let restarts = Arc::new(RestartSupervisor::new(
            MemoryRegion::new(),
            BootloopPolicy {
                stable_uptime: Duration::from_secs(60),
                ..BootloopPolicy::default()
            },
        ));
        let boot = restarts.boot().unwrap();
        let (_state_tx, state_rx) = watch::channel(TransportState::Connected);
        let mut telemetry = Telemetry::new(
            broker.clone(),
            TopicPath::new("lockbridge").unwrap(),
            state_rx,
            "eth0".to_string(),
            Arc::clone(&restarts),
            &boot,
        );

        tokio::time::advance(Duration::from_secs(120)).await;
        telemetry.publish().await.unwrap();

        assert_eq!(
            broker.last_payload("lockbridge/maintenance/uptime").as_deref(),
            Some("2")
        );
        assert_eq!(
            broker
                .last_payload("lockbridge/maintenance/mqttConnectionState")
                .as_deref(),
            Some("online")
        );
        assert_eq!(
            broker
                .last_payload("lockbridge/maintenance/bootloopCounter")
                .as_deref(),
            Some("0")
        );
        assert!(
            broker
                .last_payload("lockbridge/maintenance/networkDevice")
                .unwrap()
                .starts_with("eth0")
        );
    }
}
