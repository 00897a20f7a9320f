//! Watchdog servicing tied to task progress.
//!
//! Each long-running task registers a [`Heartbeat`] with the
//! [`WatchdogFeeder`] and beats it from its loop. The feeder feeds the
//! hardware watchdog only while every heartbeat is fresh: a task stuck in a
//! driver call or a network operation stops the feeding, and the watchdog
//! reboots the host.

use std::sync::Arc;
use std::time::Duration;

use lockbridge_hardware::Watchdog;
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

/// How often a task beats while idle.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default age after which a heartbeat counts as stalled.
pub const DEFAULT_STALL_LIMIT: Duration = Duration::from_secs(60);

/// Liveness signal of one task.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    name: Arc<str>,
    last: Arc<Mutex<Instant>>,
}

impl Heartbeat {
    pub fn beat(&self) {
        *self.last.lock() = Instant::now();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time since the last beat.
    pub fn age(&self) -> Duration {
        self.last.lock().elapsed()
    }
}

/// Feeds the watchdog while all registered tasks make progress.
pub struct WatchdogFeeder {
    watchdog: Arc<dyn Watchdog>,
    stall_limit: Duration,
    heartbeats: Vec<Heartbeat>,
    stalled: bool,
}

impl std::fmt::Debug for WatchdogFeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchdogFeeder")
            .field("stall_limit", &self.stall_limit)
            .field("heartbeats", &self.heartbeats)
            .finish_non_exhaustive()
    }
}

impl WatchdogFeeder {
    pub fn new(watchdog: Arc<dyn Watchdog>, stall_limit: Duration) -> Self {
        Self {
            watchdog,
            stall_limit,
            heartbeats: Vec::new(),
            stalled: false,
        }
    }

    /// Register a task. Its heartbeat starts fresh.
    pub fn register(&mut self, name: &str) -> Heartbeat {
        let heartbeat = Heartbeat {
            name: Arc::from(name),
            last: Arc::new(Mutex::new(Instant::now())),
        };
        self.heartbeats.push(heartbeat.clone());
        heartbeat
    }

    /// Feed the watchdog if no heartbeat is older than the stall limit.
    ///
    /// Returns whether it was fed.
    pub fn check(&mut self) -> bool {
        let stalled: Vec<&str> = self
            .heartbeats
            .iter()
            .filter(|heartbeat| heartbeat.age() > self.stall_limit)
            .map(Heartbeat::name)
            .collect();

        if stalled.is_empty() {
            if self.stalled {
                info!("All tasks responsive again, feeding the watchdog");
                self.stalled = false;
            }
            self.watchdog.feed();
            return true;
        }
        if !self.stalled {
            warn!("Tasks stalled, watchdog no longer fed: {}", stalled.join(", "));
            self.stalled = true;
        }
        false
    }

    /// Check every `interval`, forever.
    pub async fn run(mut self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.check();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbridge_hardware::mock::MockWatchdog;

    #[tokio::test(start_paused = true)]
    async fn test_fresh_heartbeats_feed() {
        let (watchdog, handle) = MockWatchdog::new();
        let mut feeder = WatchdogFeeder::new(Arc::new(watchdog), Duration::from_secs(10));
        let _network = feeder.register("network");

        assert!(feeder.check());
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(feeder.check());
        assert_eq!(handle.feed_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_task_stops_feeding() {
        let (watchdog, handle) = MockWatchdog::new();
        let mut feeder = WatchdogFeeder::new(Arc::new(watchdog), Duration::from_secs(10));
        let network = feeder.register("network");
        let lock = feeder.register("lock");

        tokio::time::advance(Duration::from_secs(5)).await;
        network.beat();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(!feeder.check());
        assert_eq!(handle.feed_count(), 0);
        assert!(lock.age() > Duration::from_secs(10));

        lock.beat();
        assert!(feeder.check());
        assert_eq!(handle.feed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_tasks_always_feeds() {
        let (watchdog, handle) = MockWatchdog::new();
        let feeder = WatchdogFeeder::new(Arc::new(watchdog), Duration::from_secs(10));

        tokio::spawn(feeder.run(Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_millis(10_500)).await;

        assert!(handle.feed_count() >= 10);
    }
}
