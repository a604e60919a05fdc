//! Condition polling with a deadline
//!
//! Pages that change asynchronously (a tracker switch re-rendering the issue
//! form, a login completed in another browser) are awaited by re-checking a
//! predicate until it holds or the deadline passes.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Deadline used when the requested timeout does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Bounded retry schedule for a page predicate
///
/// The first attempt is immediate; later attempts sleep for the interval,
/// never past the deadline. At least one attempt is always granted.
#[derive(Debug)]
pub struct Poller {
    deadline: Instant,
    interval: Duration,
    attempts: u32,
}

impl Poller {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self {
            deadline,
            interval,
            attempts: 0,
        }
    }

    /// Wait for the next attempt slot. Returns `false` once the deadline
    /// has passed and at least one attempt was made.
    pub async fn next_attempt(&mut self) -> bool {
        if self.attempts == 0 {
            self.attempts = 1;
            return true;
        }

        let now = Instant::now();
        if now >= self.deadline {
            debug!("Polling gave up after {} attempts", self.attempts);
            return false;
        }

        let wake = now
            .checked_add(self.interval)
            .map_or(self.deadline, |at| at.min(self.deadline));
        tokio::time::sleep_until(wake).await;
        self.attempts += 1;
        true
    }

    /// Number of attempts granted so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
