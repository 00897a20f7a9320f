//! Error types for the broker session and the transport supervisor.

use lockbridge_hardware::HardwareError;
use thiserror::Error;

/// Errors raised by the network layer.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// A publish or subscribe was attempted without a broker session.
    #[error("Not connected to the broker")]
    NotConnected,

    /// The MQTT client rejected a request (request queue closed or full).
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// The client request queue has no room; nothing was queued.
    #[error("MQTT request queue full")]
    QueueFull,

    /// The broker connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// An operation did not complete within its bound.
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Invalid transport state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Core(#[from] lockbridge_core::Error),
}

impl NetworkError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }
}

pub type Result<T> = std::result::Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            NetworkError::NotConnected.to_string(),
            "Not connected to the broker"
        );
        assert_eq!(
            NetworkError::Timeout(5000).to_string(),
            "Operation timed out after 5000 ms"
        );
        let err = NetworkError::InvalidStateTransition {
            from: "CriticalFailure".to_string(),
            to: "Connecting".to_string(),
        };
        assert!(err.to_string().contains("CriticalFailure"));
    }

    #[test]
    fn test_hardware_error_converts() {
        let err: NetworkError = HardwareError::not_detected("eth0").into();
        assert!(matches!(err, NetworkError::Hardware(_)));
    }
}
