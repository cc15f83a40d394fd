//! Reconnect backoff.

use std::time::Duration;

use crate::constants::{INITIAL_BACKOFF, MAX_BACKOFF};

/// Exponential backoff: `initial * 2^(attempt - 1)`, capped at `max`.
///
/// With the defaults the delays run 1s, 2s, 4s, 8s, 16s, 30s, 30s, ...
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based). Attempt 0 is the
    /// first connection and does not wait.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}
