//! Reconnect delay policy
//!
//! The delay starts at [`RECONNECT_FLOOR`], doubles after every close
//! without an intervening open, and never exceeds [`RECONNECT_CEILING`].
//! No jitter and no elapsed-time limit: the node retries forever on an
//! exact schedule.

use std::time::Duration;

use ::backoff::ExponentialBackoff;

/// First reconnect delay, and the value restored on every successful open
pub const RECONNECT_FLOOR: Duration = Duration::from_millis(1_000);

/// Upper bound for the reconnect delay
pub const RECONNECT_CEILING: Duration = Duration::from_millis(30_000);

/// Growth factor applied after each scheduled reconnect
pub const RECONNECT_MULTIPLIER: f64 = 2.0;

/// Exponential backoff on the fixed reconnect schedule
pub fn reconnect_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        // `Default` starts at 500ms, so the current value is set explicitly
        current_interval: RECONNECT_FLOOR,
        initial_interval: RECONNECT_FLOOR,
        max_interval: RECONNECT_CEILING,
        multiplier: RECONNECT_MULTIPLIER,
        randomization_factor: 0.0,
        max_elapsed_time: None, // Retry forever
        ..Default::default()
    }
}
