//! Storage layer for the lockbridge gateway.
//!
//! Two kinds of state outlive the process:
//!
//! - **Preferences** in a SQLite database: ACL tables, the selected network
//!   hardware, restart policy flags and the number of entries published per
//!   dynamic list. See [`PreferenceStore`].
//! - **Restart diagnostics** in a retained memory region that survives a warm
//!   reboot only: the reason for the last deliberate restart and the bootloop
//!   counter. See [`RestartSupervisor`].
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool manager with automatic migrations
//! - [`PreferenceStore`] - Typed key-value access and ACL persistence
//! - [`AclTable`] - Fail-closed permission tables
//! - [`RestartSupervisor`] over a [`RetainedRegion`] - Restart reasons and
//!   bootloop mitigation
//!
//! # Examples
//!
//! ```no_run
//! use lockbridge_core::RestartReason;
//! use lockbridge_storage::{
//!     BootloopPolicy, Database, DatabaseConfig, FileRegion, PreferenceStore, RestartSupervisor,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DatabaseConfig::new("/var/lib/lockbridge/lockbridge.db")).await?;
//! let preferences = PreferenceStore::new(&db);
//! let acl = preferences.load_acl().await?;
//!
//! let restarts = RestartSupervisor::new(
//!     FileRegion::new("/run/lockbridge/restart.bin"),
//!     BootloopPolicy::default(),
//! );
//! let report = restarts.boot()?;
//! if report.bootloop_detected {
//!     restarts.recover_from_bootloop(&preferences).await?;
//! }
//!
//! // later, right before a deliberate restart
//! restarts.record_reason(RestartReason::RequestedViaMqtt)?;
//! # drop(acl);
//! # Ok(())
//! # }
//! ```
//!
//! # SQL
//!
//! All queries use parameterized statements via SQLx. The schema is embedded
//! at compile time with `sqlx::migrate!`.

pub mod acl;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod preferences;

pub use acl::{AclBits, AclTable};
pub use connection::{Database, DatabaseConfig};
pub use diagnostics::{
    BootReport, BootloopPolicy, FileRegion, MemoryRegion, PersistentDiagnostics, RestartRecord,
    RestartSupervisor, RetainedRegion,
};
pub use error::{StorageError, StorageResult};
pub use preferences::PreferenceStore;
