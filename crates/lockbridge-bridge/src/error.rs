//! Error types for the bridge.
//!
//! Command outcomes (`Denied`, `UnknownAction`, `Failed`, `Busy`) are not
//! errors; they are reported on the acknowledgement topic. A [`BridgeError`]
//! means the bridge itself could not do its job, for example because the
//! broker session is gone.

use lockbridge_hardware::HardwareError;
use lockbridge_network::NetworkError;
use lockbridge_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Core(#[from] lockbridge_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The worker of a device has stopped and no longer takes commands.
    #[error("Device worker for {0} has stopped")]
    WorkerStopped(String),
}

impl BridgeError {
    pub fn worker_stopped(device: impl Into<String>) -> Self {
        Self::WorkerStopped(device.into())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::worker_stopped("lock");
        assert_eq!(err.to_string(), "Device worker for lock has stopped");

        let err: BridgeError = NetworkError::NotConnected.into();
        assert_eq!(err.to_string(), "Not connected to the broker");
    }

    #[test]
    fn test_core_error_is_transparent() {
        let err: BridgeError = lockbridge_core::Error::UnknownAction("dance".to_string()).into();
        assert_eq!(err.to_string(), "Unknown action: dance");
    }
}
