//! Confirmation-timer bookkeeping: deadline arithmetic and the
//! exactly-once expiry guard. Scheduling itself goes through the session's
//! event loop so expiry is always re-checked against session state at fire
//! time.

use std::time::Duration;

#[derive(Debug)]
pub struct ConfirmationTimer {
    deadline: Duration,
    tick_interval: Duration,
    expired: bool,
}

impl ConfirmationTimer {
    pub fn new(now: Duration, window: Duration, tick_interval: Duration) -> Self {
        Self {
            deadline: now + window,
            tick_interval,
            expired: false,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn remaining(&self, now: Duration) -> Duration {
        self.deadline.saturating_sub(now)
    }

    /// Whether another tick fits strictly before the deadline. The final
    /// instant belongs to expiry, not a zero-remaining tick.
    pub fn next_tick_fits(&self, now: Duration) -> bool {
        now + self.tick_interval < self.deadline
    }

    /// First call returns true; expiry fires exactly once.
    pub fn mark_expired(&mut self) -> bool {
        if self.expired {
            return false;
        }
        self.expired = true;
        true
    }
}

/// Whole seconds remaining for countdown display, rounded up so the host
/// never shows 0s while time remains.
pub fn remaining_secs(remaining: Duration) -> u64 {
    remaining.as_millis().div_ceil(1000) as u64
}
