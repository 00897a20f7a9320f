//! Shared domain types for the lockbridge gateway.
//!
//! Everything that crosses a crate boundary lives here: device kinds and
//! actions, device snapshots and log entries, restart reasons and the
//! bounds-checked [`TopicPath`] builder used for every MQTT topic.

pub mod constants;
pub mod error;
pub mod restart;
pub mod snapshot;
pub mod topic;
pub mod types;

pub use error::{Error, Result};
pub use restart::{RestartClass, RestartReason};
pub use snapshot::*;
pub use topic::TopicPath;
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
