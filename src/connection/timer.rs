//! Cancellable one-shot timer used for reconnect scheduling

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep_until, Instant, Sleep};

/// A single deadline that can be armed, re-armed and cancelled.
///
/// `fired()` never completes while the timer is disarmed, so it can sit in
/// a `select!` unconditionally.
#[derive(Debug, Default)]
pub struct Deadline {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Deadline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer `after` from now, replacing any earlier deadline
    pub fn arm(&mut self, after: Duration) {
        self.sleep = Some(Box::pin(sleep_until(Instant::now() + after)));
    }

    /// Disarm the timer. Returns whether it was armed.
    pub fn cancel(&mut self) -> bool {
        self.sleep.take().is_some()
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// When the armed deadline elapses
    #[cfg(test)]
    pub fn deadline(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|s| s.deadline())
    }

    /// Resolve once the armed deadline passes, then disarm.
    ///
    /// Cancel safe: dropping the future leaves the timer armed.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => pending().await,
        }
    }
}
