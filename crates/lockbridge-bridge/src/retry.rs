//! Bounded retries of device commands.
//!
//! A [`RetryExecutor`] runs one [`HardwareCommand`] at a time. While it runs,
//! the "communicating" indicator pins are high; after a failed attempt the
//! "communication error" pins go high as well until the command finishes.
//! Both groups are driven low again on every exit path, including when the
//! future is dropped mid-retry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lockbridge_core::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, MIN_RETRY_DELAY_MS};
use lockbridge_core::{Action, CmdResult};
use lockbridge_hardware::traits::{GpioController, LockDriver, Watchdog};
use lockbridge_hardware::types::{GpioRoleTable, PinId, PinRole};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Retry settings of one executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Driven high while a command runs.
    pub indicator_pins: Vec<PinId>,
    /// Driven high after the first failed attempt.
    pub error_pins: Vec<PinId>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS)
    }
}

impl RetryPolicy {
    /// Create a policy without indicator pins.
    ///
    /// Delays below the 100 ms floor are raised to it.
    ///
    /// ```
    /// use std::time::Duration;
    /// use lockbridge_bridge::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::new(5, 20);
    /// assert_eq!(policy.retry_delay, Duration::from_millis(100));
    /// ```
    pub fn new(max_retries: u32, retry_delay_ms: u32) -> Self {
        Self {
            max_retries,
            retry_delay: Duration::from_millis(u64::from(retry_delay_ms.max(MIN_RETRY_DELAY_MS))),
            indicator_pins: Vec::new(),
            error_pins: Vec::new(),
        }
    }

    /// Take the indicator pins from the GPIO role table.
    pub fn with_role_table(mut self, table: &GpioRoleTable) -> Self {
        self.indicator_pins = table.pins_for(PinRole::Communicating);
        self.error_pins = table.pins_for(PinRole::CommunicationError);
        self
    }

    pub fn indicator_pins(mut self, pins: Vec<PinId>) -> Self {
        self.indicator_pins = pins;
        self
    }

    pub fn error_pins(mut self, pins: Vec<PinId>) -> Self {
        self.error_pins = pins;
        self
    }

    /// Upper bound of attempts for one command.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// One retryable operation against the device.
///
/// Plain closures returning a [`CmdResult`] implement it, which keeps tests
/// and simple callers short.
pub trait HardwareCommand: Send {
    fn attempt(&mut self) -> impl Future<Output = CmdResult> + Send;
}

impl<F> HardwareCommand for F
where
    F: FnMut() -> CmdResult + Send,
{
    async fn attempt(&mut self) -> CmdResult {
        self()
    }
}

/// Send an action through a driver.
pub struct SendAction<'a, D> {
    pub driver: &'a mut D,
    pub action: Action,
}

impl<D: LockDriver> HardwareCommand for SendAction<'_, D> {
    async fn attempt(&mut self) -> CmdResult {
        self.driver.send_command(self.action).await
    }
}

/// Write one configuration field through a driver.
pub struct WriteConfig<'a, D> {
    pub driver: &'a mut D,
    pub field: &'a str,
    pub value: &'a Value,
}

impl<D: LockDriver> HardwareCommand for WriteConfig<'_, D> {
    async fn attempt(&mut self) -> CmdResult {
        self.driver.set_config(self.field, self.value).await
    }
}

/// The executor is already running a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorBusy;

/// Runs hardware commands with retries, one at a time.
pub struct RetryExecutor {
    policy: RetryPolicy,
    gpio: Arc<dyn GpioController>,
    watchdog: Arc<dyn Watchdog>,
    running: Mutex<()>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    pub fn new(
        policy: RetryPolicy,
        gpio: Arc<dyn GpioController>,
        watchdog: Arc<dyn Watchdog>,
    ) -> Self {
        Self {
            policy,
            gpio,
            watchdog,
            running: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `command`, waiting for a command already in progress to finish.
    ///
    /// Returns the first success, or the result of the last attempt.
    pub async fn run<C: HardwareCommand>(&self, command: C) -> CmdResult {
        let _running = self.running.lock().await;
        self.execute(command).await
    }

    /// Run `command` unless another one is in progress.
    pub async fn try_run<C: HardwareCommand>(
        &self,
        command: C,
    ) -> std::result::Result<CmdResult, ExecutorBusy> {
        let _running = self.running.try_lock().map_err(|_| ExecutorBusy)?;
        Ok(self.execute(command).await)
    }

    async fn execute<C: HardwareCommand>(&self, mut command: C) -> CmdResult {
        let mut indicators = Indicators::new(self.gpio.as_ref(), &self.policy);
        indicators.raise_busy();

        let mut attempt = 1;
        loop {
            let result = command.attempt().await;
            if result.is_success() {
                debug!("Command succeeded on attempt {}", attempt);
                return result;
            }
            if attempt >= self.policy.max_attempts() {
                warn!("Command failed after {} attempts: {}", attempt, result);
                return result;
            }

            warn!(
                "Attempt {}/{} failed ({}), retrying in {:?}",
                attempt,
                self.policy.max_attempts(),
                result,
                self.policy.retry_delay
            );
            indicators.raise_error();
            self.watchdog.feed();
            tokio::time::sleep(self.policy.retry_delay).await;
            attempt += 1;
        }
    }
}

/// Indicator pins driven by one command. Lowered on drop.
struct Indicators<'a> {
    gpio: &'a dyn GpioController,
    busy: &'a [PinId],
    error: &'a [PinId],
    error_raised: bool,
}

impl<'a> Indicators<'a> {
    fn new(gpio: &'a dyn GpioController, policy: &'a RetryPolicy) -> Self {
        Self {
            gpio,
            busy: &policy.indicator_pins,
            error: &policy.error_pins,
            error_raised: false,
        }
    }

    fn raise_busy(&mut self) {
        self.drive(self.busy, true);
    }

    fn raise_error(&mut self) {
        if !self.error_raised {
            self.error_raised = true;
            self.drive(self.error, true);
        }
    }

    fn drive(&self, pins: &[PinId], high: bool) {
        for pin in pins {
            if let Err(e) = self.gpio.set_level(*pin, high) {
                warn!("Failed to drive indicator {}: {}", pin, e);
            }
        }
    }
}

impl Drop for Indicators<'_> {
    fn drop(&mut self) {
        self.drive(self.busy, false);
        self.drive(self.error, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbridge_core::{DeviceKind, LockAction};
    use lockbridge_hardware::mock::{
        MockGpio, MockGpioHandle, MockLockDriver, MockWatchdog, MockWatchdogHandle,
    };
    use rstest::rstest;

    const BUSY: PinId = PinId(4);
    const ERROR: PinId = PinId(5);

    fn executor(max_retries: u32) -> (Arc<RetryExecutor>, MockGpioHandle, MockWatchdogHandle) {
        let (gpio, gpio_handle) = MockGpio::new();
        let (watchdog, watchdog_handle) = MockWatchdog::new();
        let policy = RetryPolicy::new(max_retries, 100)
            .indicator_pins(vec![BUSY])
            .error_pins(vec![ERROR]);
        let executor = RetryExecutor::new(policy, Arc::new(gpio), Arc::new(watchdog));
        (Arc::new(executor), gpio_handle, watchdog_handle)
    }

    fn scripted(
        results: Vec<CmdResult>,
    ) -> (impl FnMut() -> CmdResult + Send, Arc<parking_lot::Mutex<u32>>) {
        let calls = Arc::new(parking_lot::Mutex::new(0u32));
        let counter = Arc::clone(&calls);
        let mut results = results.into_iter();
        let command = move || {
            *counter.lock() += 1;
            results.next().unwrap_or(CmdResult::Failed)
        };
        (command, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let (executor, gpio, watchdog) = executor(3);
        let (command, calls) = scripted(vec![CmdResult::Failed, CmdResult::TimeOut, CmdResult::Success]);

        let result = executor.run(command).await;

        assert_eq!(result, CmdResult::Success);
        assert_eq!(*calls.lock(), 3);
        assert_eq!(watchdog.feed_count(), 2);
        assert_eq!(gpio.level(BUSY), Some(false));
        assert_eq!(gpio.level(ERROR), Some(false));
        assert_eq!(
            gpio.history(),
            vec![(BUSY, true), (ERROR, true), (BUSY, false), (ERROR, false)]
        );
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 2)]
    #[case(3, 4)]
    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_bounded(#[case] max_retries: u32, #[case] expected_calls: u32) {
        let (executor, gpio, _watchdog) = executor(max_retries);
        let (command, calls) = scripted(Vec::new());

        assert_eq!(executor.run(command).await, CmdResult::Failed);
        assert_eq!(*calls.lock(), expected_calls);
        assert!(!gpio.any_high());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_failure_is_returned() {
        let (executor, _gpio, _watchdog) = executor(1);
        let (command, _calls) = scripted(vec![CmdResult::TimeOut, CmdResult::NotPaired]);

        assert_eq!(executor.run(command).await, CmdResult::NotPaired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_skips_error_pins() {
        let (executor, gpio, watchdog) = executor(3);
        let (command, calls) = scripted(vec![CmdResult::Success]);

        assert_eq!(executor.run(command).await, CmdResult::Success);
        assert_eq!(*calls.lock(), 1);
        assert_eq!(watchdog.feed_count(), 0);
        assert_eq!(gpio.level(ERROR), Some(false));
        assert!(!gpio.history().contains(&(ERROR, true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delay_is_respected() {
        let (executor, _gpio, _watchdog) = executor(2);
        let (command, _calls) = scripted(Vec::new());

        let started = tokio::time::Instant::now();
        executor.run(command).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pins_lowered_when_cancelled() {
        let (executor, gpio, _watchdog) = executor(10);
        let (command, _calls) = scripted(Vec::new());

        let result = tokio::time::timeout(Duration::from_millis(250), executor.run(command)).await;

        assert!(result.is_err());
        assert!(!gpio.any_high());
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_run_rejects_while_busy() {
        let (executor, _gpio, _watchdog) = executor(3);
        let (mut driver, handle) = MockLockDriver::new(DeviceKind::Lock);
        handle.set_latency(Duration::from_millis(500));
        let action = Action::Lock(LockAction::Unlock);

        let background = Arc::clone(&executor);
        let first = tokio::spawn(async move {
            background
                .run(SendAction {
                    driver: &mut driver,
                    action,
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (command, calls) = scripted(vec![CmdResult::Success]);
        assert_eq!(executor.try_run(command).await, Err(ExecutorBusy));
        assert_eq!(*calls.lock(), 0);

        assert_eq!(first.await.unwrap(), CmdResult::Success);
        assert_eq!(handle.max_concurrent_commands(), 1);
    }

    #[tokio::test]
    async fn test_write_config_goes_through_driver() {
        let (executor, _gpio, _watchdog) = executor(0);
        let (mut driver, handle) = MockLockDriver::new(DeviceKind::Lock);
        let value = serde_json::json!(30);

        let result = executor
            .run(WriteConfig {
                driver: &mut driver,
                field: "autoLockTimeOut",
                value: &value,
            })
            .await;

        assert_eq!(result, CmdResult::Success);
        assert_eq!(handle.config_writes(), vec![("autoLockTimeOut".to_string(), value)]);
    }

    #[test]
    fn test_policy_from_role_table() {
        use lockbridge_hardware::types::PinAssignment;

        let table = GpioRoleTable::new(vec![
            PinAssignment { pin: PinId(2), role: PinRole::Communicating },
            PinAssignment { pin: PinId(3), role: PinRole::CommunicationError },
            PinAssignment { pin: PinId(7), role: PinRole::Locked },
        ]);
        let policy = RetryPolicy::default().with_role_table(&table);

        assert_eq!(policy.indicator_pins, vec![PinId(2)]);
        assert_eq!(policy.error_pins, vec![PinId(3)]);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.retry_delay, Duration::from_millis(100));
    }
}
