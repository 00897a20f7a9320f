//! Mock GPIO controller and watchdog.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::Result;
use crate::traits::{GpioController, Watchdog};
use crate::types::PinId;

#[derive(Debug, Default)]
struct GpioState {
    levels: HashMap<PinId, bool>,
    history: Vec<(PinId, bool)>,
}

/// GPIO controller that records every write.
///
/// # Examples
///
/// ```
/// use lockbridge_hardware::mock::MockGpio;
/// use lockbridge_hardware::traits::GpioController;
/// use lockbridge_hardware::types::PinId;
///
/// let (gpio, handle) = MockGpio::new();
/// gpio.set_level(PinId(4), true).unwrap();
/// assert_eq!(handle.level(PinId(4)), Some(true));
/// assert_eq!(handle.level(PinId(5)), None);
/// ```
#[derive(Debug)]
pub struct MockGpio {
    state: Arc<Mutex<GpioState>>,
}

impl MockGpio {
    pub fn new() -> (Self, MockGpioHandle) {
        let state = Arc::new(Mutex::new(GpioState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockGpioHandle { state },
        )
    }
}

impl GpioController for MockGpio {
    fn set_level(&self, pin: PinId, high: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.levels.insert(pin, high);
        state.history.push((pin, high));
        Ok(())
    }
}

/// Read side of a [`MockGpio`].
#[derive(Debug, Clone)]
pub struct MockGpioHandle {
    state: Arc<Mutex<GpioState>>,
}

impl MockGpioHandle {
    /// Last level written to `pin`, if any.
    pub fn level(&self, pin: PinId) -> Option<bool> {
        self.state.lock().levels.get(&pin).copied()
    }

    /// Every write in order.
    pub fn history(&self) -> Vec<(PinId, bool)> {
        self.state.lock().history.clone()
    }

    /// Whether any pin is currently driven high.
    pub fn any_high(&self) -> bool {
        self.state.lock().levels.values().any(|high| *high)
    }
}

/// Watchdog that counts feeds.
#[derive(Debug)]
pub struct MockWatchdog {
    feeds: Arc<AtomicU64>,
}

impl MockWatchdog {
    pub fn new() -> (Self, MockWatchdogHandle) {
        let feeds = Arc::new(AtomicU64::new(0));
        (
            Self {
                feeds: Arc::clone(&feeds),
            },
            MockWatchdogHandle { feeds },
        )
    }
}

impl Watchdog for MockWatchdog {
    fn feed(&self) {
        self.feeds.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct MockWatchdogHandle {
    feeds: Arc<AtomicU64>,
}

impl MockWatchdogHandle {
    pub fn feed_count(&self) -> u64 {
        self.feeds.load(Ordering::SeqCst)
    }
}
