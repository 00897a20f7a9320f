//! Bridge between lock drivers and the broker.
//!
//! This crate holds the logic of the gateway that does not depend on a
//! particular driver or broker library:
//!
//! - [`access`]: ACL checks for actions and configuration fields
//! - [`retry`]: bounded retries of driver commands with indicator pins
//! - [`sync`]: diffing of device snapshots and log handling
//! - [`discovery`] and [`entities`]: home-automation registrations and the
//!   topics of variable-length lists
//! - [`router`]: dispatch of inbound messages to device queues
//! - [`worker`]: the per-device task that owns a driver
//! - [`heartbeat`]: watchdog feeding gated on the progress of every task
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use lockbridge_bridge::access::AccessController;
//! use lockbridge_bridge::retry::{RetryExecutor, RetryPolicy};
//! use lockbridge_bridge::router::CommandRouter;
//! use lockbridge_bridge::worker::{DeviceWorker, WorkerConfig};
//! use lockbridge_core::{DeviceKind, TopicPath};
//! use lockbridge_hardware::mock::{MockGpio, MockLockDriver, MockWatchdog};
//! use lockbridge_network::mock::MockBroker;
//! use lockbridge_storage::AclTable;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = MockBroker::new();
//! let access = Arc::new(AccessController::new(AclTable::allow_all()));
//! let (driver, _handle) = MockLockDriver::new(DeviceKind::Lock);
//! let (gpio, _) = MockGpio::new();
//! let (watchdog, _) = MockWatchdog::new();
//!
//! let executor = RetryExecutor::new(RetryPolicy::default(), Arc::new(gpio), Arc::new(watchdog));
//! let config = WorkerConfig::new(TopicPath::new("lockbridge/lock")?, "front-door");
//! let (worker, route) =
//!     DeviceWorker::new(driver, broker.clone(), Arc::clone(&access), executor, config);
//!
//! let mut router = CommandRouter::new(broker, access);
//! router.add_device(route);
//! router.subscribe_all().await?;
//! tokio::spawn(worker.run());
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod discovery;
pub mod entities;
pub mod error;
pub mod heartbeat;
pub mod retry;
pub mod router;
pub mod sync;
pub mod worker;

pub use access::{AccessController, Authorization, ConfigMode, FieldDecision};
pub use entities::{EntityLifecycleManager, ListChange};
pub use error::{BridgeError, Result};
pub use heartbeat::{Heartbeat, WatchdogFeeder};
pub use retry::{RetryExecutor, RetryPolicy};
pub use router::{CommandRouter, DeviceRoute, RouteOutcome, WorkerRequest};
pub use sync::{LogUpdate, StateSynchronizer};
pub use worker::{DeviceWorker, WorkerConfig};
