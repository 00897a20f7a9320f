//! GPIO and watchdog backends for Linux hosts.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::traits::{GpioController, Watchdog};
use crate::types::{GpioRoleTable, PinId};
use crate::{HardwareError, Result};

const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

/// GPIO lines driven through the sysfs GPIO interface.
///
/// Pins of the role table are exported and configured as outputs once, when
/// the controller is created.
#[derive(Debug)]
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    /// Export every pin of `table` below `/sys/class/gpio`.
    ///
    /// # Errors
    ///
    /// Returns an error if a pin cannot be configured as output.
    pub fn open(table: &GpioRoleTable) -> Result<Self> {
        Self::open_at(DEFAULT_GPIO_ROOT, table)
    }

    pub fn open_at(root: impl AsRef<Path>, table: &GpioRoleTable) -> Result<Self> {
        let gpio = Self {
            root: root.as_ref().to_path_buf(),
        };
        for assignment in table.assignments() {
            gpio.export(assignment.pin)?;
        }
        Ok(gpio)
    }

    fn pin_dir(&self, pin: PinId) -> PathBuf {
        self.root.join(format!("gpio{}", pin.0))
    }

    fn export(&self, pin: PinId) -> Result<()> {
        if !self.pin_dir(pin).exists() {
            std::fs::write(self.root.join("export"), pin.0.to_string()).map_err(|e| {
                HardwareError::configuration(format!("cannot export {pin}: {e}"))
            })?;
        }
        std::fs::write(self.pin_dir(pin).join("direction"), "out")
            .map_err(|e| HardwareError::configuration(format!("cannot configure {pin}: {e}")))?;
        debug!("Configured {} as output", pin);
        Ok(())
    }
}

impl GpioController for SysfsGpio {
    fn set_level(&self, pin: PinId, high: bool) -> Result<()> {
        let value = if high { "1" } else { "0" };
        std::fs::write(self.pin_dir(pin).join("value"), value)?;
        Ok(())
    }
}

/// GPIO controller for hosts without indicator lines.
#[derive(Debug, Default)]
pub struct NoGpio;

impl GpioController for NoGpio {
    fn set_level(&self, _pin: PinId, _high: bool) -> Result<()> {
        Ok(())
    }
}

/// Kernel watchdog device such as `/dev/watchdog`.
///
/// Opening the device arms it; every write restarts the countdown.
#[derive(Debug)]
pub struct DeviceWatchdog {
    device: Mutex<File>,
}

impl DeviceWatchdog {
    /// # Errors
    ///
    /// Returns an error if the device cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let device = OpenOptions::new().write(true).open(path.as_ref())?;
        Ok(Self {
            device: Mutex::new(device),
        })
    }
}

impl Watchdog for DeviceWatchdog {
    fn feed(&self) {
        let mut device = self.device.lock();
        if let Err(e) = device.write_all(b"\0").and_then(|()| device.flush()) {
            warn!("Failed to feed watchdog: {}", e);
        }
    }
}

/// Watchdog stand-in when no device is configured.
#[derive(Debug, Default)]
pub struct DisabledWatchdog;

impl Watchdog for DisabledWatchdog {
    fn feed(&self) {}
}
