//! Minimum-interval rate limiting per user.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Enforces a minimum interval between accepted messages from each user
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_accepted: HashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: HashMap::new(),
        }
    }

    /// Accept and record a message from `user`, or return how long they must
    /// still wait
    pub fn check(&mut self, user: &str) -> Result<(), Duration> {
        self.check_at(user, Instant::now())
    }

    /// [`check`](Self::check) against an explicit clock reading
    pub fn check_at(&mut self, user: &str, now: Instant) -> Result<(), Duration> {
        if let Some(last) = self.last_accepted.get(user) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.min_interval {
                let retry_after = self.min_interval - elapsed;
                debug!(user, ?retry_after, "Rate limited");
                return Err(retry_after);
            }
        }

        self.record_at(user, now);
        Ok(())
    }

    /// Record a message from `user` as sent now, whatever the history
    pub fn record(&mut self, user: &str) {
        self.record_at(user, Instant::now());
    }

    pub fn record_at(&mut self, user: &str, now: Instant) {
        self.last_accepted.insert(user.to_string(), now);
    }
}
