//! Reconnection backoff for the scan loop.

use std::time::Duration;

/// The delay doubles for each attempt up to `base * 2^MAX_DOUBLINGS`.
pub const MAX_DOUBLINGS: u32 = 5;

/// Delay before reconnect attempt `attempt` (1-based).
pub fn delay_for_attempt(base: Duration, attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(MAX_DOUBLINGS);
    base.saturating_mul(1u32 << doublings)
}

/// What the loop should do after a failed iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Sleep for `delay`, rebuild the clients, and try again.
    Retry { attempt: u32, delay: Duration },
    /// Attempts are exhausted; the stream must stop.
    GiveUp { attempts: u32 },
}

/// Counts consecutive failures of the scan loop.
///
/// `max_attempts` reconnects are allowed; failure number `max_attempts + 1`
/// gives up. A successful iteration resets the count.
#[derive(Clone, Debug)]
pub struct Backoff {
    base_delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn on_success(&mut self) {
        self.attempts = 0;
    }

    pub fn on_failure(&mut self) -> BackoffDecision {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.max_attempts {
            return BackoffDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        BackoffDecision::Retry {
            attempt: self.attempts,
            delay: delay_for_attempt(self.base_delay, self.attempts),
        }
    }
}
