//! The token-bucket state machine itself (spec section 4.3).

use std::time::{Duration, Instant};

/// `capacity`, `tokensPerSecond`, `availableTokens`, `lastRefill` from the
/// spec's data model, as a plain (non-shared) state struct. [`crate::RateLimiter`]
/// wraps this in a mutex for concurrent access.
pub(crate) struct TokenBucket {
    capacity: f64,
    tokens_per_second: f64,
    available: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub(crate) fn new(tokens_per_second: f64, burst_capacity: u64) -> Self {
        Self {
            capacity: burst_capacity as f64,
            tokens_per_second,
            available: burst_capacity as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.available = (self.available + elapsed * self.tokens_per_second).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Attempts to withdraw `n` tokens. Returns `Ok(())` if granted
    /// immediately, or `Err(deficit_time)` — the duration to sleep before
    /// retrying — if not enough tokens are available yet.
    pub(crate) fn try_acquire(&mut self, n: f64) -> Result<(), Duration> {
        let now = Instant::now();
        self.refill(now);

        if self.available >= n {
            self.available -= n;
            return Ok(());
        }

        let deficit = n - self.available;
        let wait_secs = if self.tokens_per_second > 0.0 {
            deficit / self.tokens_per_second
        } else {
            f64::INFINITY
        };
        Err(Duration::from_secs_f64(wait_secs))
    }

    pub(crate) fn available_tokens(&mut self) -> f64 {
        self.refill(Instant::now());
        self.available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_up_to_burst_capacity_immediately() {
        let mut bucket = TokenBucket::new(1.0, 5);
        for _ in 0..5 {
            assert!(bucket.try_acquire(1.0).is_ok());
        }
        assert!(bucket.try_acquire(1.0).is_err());
    }

    #[test]
    fn deficit_reports_time_proportional_to_rate() {
        let mut bucket = TokenBucket::new(2.0, 1);
        bucket.try_acquire(1.0).unwrap();
        let wait = bucket.try_acquire(1.0).unwrap_err();
        assert!((wait.as_secs_f64() - 0.5).abs() < 0.05);
    }

    #[test]
    fn refill_caps_at_capacity() {
        let mut bucket = TokenBucket::new(1000.0, 3);
        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.available_tokens() <= 3.0);
    }
}
