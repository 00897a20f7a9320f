//! Hardware error type.
//!
//! One enum covers the lock driver, the GPIO and watchdog backends and the
//! network adapters. [`HardwareError::is_permanent`] separates missing
//! hardware, which no retry fixes, from transient trouble.

pub type Result<T> = std::result::Result<T, HardwareError>;

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// The driver's event stream ended; the device is gone.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// The adapter or device is not present at all.
    #[error("Hardware not detected: {device}")]
    NotDetected { device: String },

    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The adapter is present but talking to it failed.
    #[error("Communication error: {message}")]
    CommunicationError { message: String },

    /// Link is up but no usable address was obtained.
    #[error("Address assignment failed: {message}")]
    AddressAssignment { message: String },

    /// Bad pin table, watchdog path or interface settings.
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    pub fn not_detected(device: impl Into<String>) -> Self {
        Self::NotDetected {
            device: device.into(),
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    pub fn address_assignment(message: impl Into<String>) -> Self {
        Self::AddressAssignment {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Whether retrying the operation can ever help.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::NotDetected { .. } | Self::ConfigurationError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(HardwareError::not_detected("eth0"), true)]
    #[case(HardwareError::configuration("pin 99 not exportable"), true)]
    #[case(HardwareError::timeout(3000), false)]
    #[case(HardwareError::address_assignment("no lease"), false)]
    #[case(HardwareError::disconnected("lock"), false)]
    #[case(HardwareError::communication("carrier lost"), false)]
    fn test_is_permanent(#[case] error: HardwareError, #[case] permanent: bool) {
        assert_eq!(error.is_permanent(), permanent);
    }

    #[test]
    fn test_messages_name_the_device() {
        assert_eq!(
            HardwareError::not_detected("eth0").to_string(),
            "Hardware not detected: eth0"
        );
        assert_eq!(
            HardwareError::timeout(3000).to_string(),
            "Operation timeout after 3000ms"
        );
        assert_eq!(
            HardwareError::address_assignment("no lease").to_string(),
            "Address assignment failed: no lease"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error: HardwareError = io.into();
        assert!(matches!(error, HardwareError::Io(_)));
        assert!(!error.is_permanent());
    }
}
