use std::collections::HashMap;
use std::time::Duration;

/// Retries allowed per URL when the core answers 429.
pub const RATE_LIMIT_RETRIES: u32 = 5;

/// Per-URL rate-limit budget for a single logical request.
#[derive(Debug, Default)]
pub struct RetryBudget {
    remaining: HashMap<String, u32>,
}

impl RetryBudget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one retry for `url` and return how long to wait before it.
    ///
    /// `None` once the budget for `url` is spent.
    pub fn consume(&mut self, url: &str) -> Option<Duration> {
        let remaining = self
            .remaining
            .entry(url.to_string())
            .or_insert(RATE_LIMIT_RETRIES);
        if *remaining == 0 {
            return None;
        }
        let attempts_made = RATE_LIMIT_RETRIES - *remaining;
        *remaining -= 1;
        Some(rate_limit_delay(attempts_made))
    }

    #[must_use]
    pub fn remaining(&self, url: &str) -> u32 {
        self.remaining
            .get(url)
            .copied()
            .unwrap_or(RATE_LIMIT_RETRIES)
    }
}

#[must_use]
pub fn rate_limit_delay(attempts_made: u32) -> Duration {
    Duration::from_millis(10 + 250 * u64::from(attempts_made))
}
