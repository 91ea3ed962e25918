//! Heartbeat scheduling
//!
//! The scheduler only owns the recurring timer. Whether a tick actually
//! sends anything is decided by the connection manager, which skips ticks
//! unless its connection is open.

use std::future::pending;
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::trace;

/// Period between two heartbeats while the connection is open
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10_000);

/// Owns at most one recurring heartbeat timer
#[derive(Debug)]
pub struct HeartbeatScheduler {
    period: Duration,
    timer: Option<Interval>,
}

impl HeartbeatScheduler {
    pub fn new(period: Duration) -> Self {
        Self { period, timer: None }
    }

    /// (Re)arm the timer. The first tick lands one full period from now.
    pub fn start(&mut self) {
        self.stop();
        let mut timer = interval_at(Instant::now() + self.period, self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
        trace!(period_ms = self.period.as_millis() as u64, "Heartbeat armed");
    }

    /// Cancel the timer; a no-op when none is armed
    pub fn stop(&mut self) {
        if self.timer.take().is_some() {
            trace!("Heartbeat cancelled");
        }
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.timer.is_some()
    }

    /// Next tick of the armed timer; pending forever when stopped
    pub async fn tick(&mut self) -> Instant {
        match self.timer.as_mut() {
            Some(timer) => timer.tick().await,
            None => pending().await,
        }
    }
}

impl Default for HeartbeatScheduler {
    fn default() -> Self {
        Self::new(HEARTBEAT_INTERVAL)
    }
}
