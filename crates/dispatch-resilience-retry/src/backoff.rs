//! Backoff strategies (spec section 4.6). Each is a pure function of the
//! zero-indexed attempt number and a base delay; no state, no I/O.

use rand::Rng;
use std::time::Duration;

const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// How the delay between retry attempts grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// Every attempt waits the same `base_delay`.
    Fixed,
    /// Delay grows linearly: `base_delay * (attempt + 1)`.
    Linear,
    /// Delay doubles each attempt: `base_delay * 2^attempt`.
    Exponential,
    /// Exponential, then scaled by a uniform random multiplier in
    /// `[0.5, 1.5]` to avoid synchronized retry storms across callers.
    ExponentialJitter,
}

impl BackoffStrategy {
    /// Computes the delay before retry attempt `attempt` (0-indexed: the
    /// delay before the *first* retry, i.e. after the initial call fails,
    /// is `delay_for(0, ..)`).
    ///
    /// The result is clamped to `[Duration::ZERO, max_delay.unwrap_or(30s)]`.
    pub fn delay_for(self, attempt: u32, base_delay: Duration, max_delay: Option<Duration>) -> Duration {
        let cap = max_delay.unwrap_or(DEFAULT_MAX_DELAY);
        let raw = match self {
            BackoffStrategy::Fixed => base_delay,
            BackoffStrategy::Linear => base_delay.saturating_mul(attempt + 1),
            BackoffStrategy::Exponential => checked_pow2_mul(base_delay, attempt),
            BackoffStrategy::ExponentialJitter => {
                let exp = checked_pow2_mul(base_delay, attempt);
                let multiplier = rand::rng().random_range(0.5..=1.5);
                Duration::from_secs_f64((exp.as_secs_f64() * multiplier).max(0.0))
            }
        };
        raw.min(cap)
    }
}

fn checked_pow2_mul(base: Duration, attempt: u32) -> Duration {
    // Saturate rather than overflow for large attempt counts; the caller
    // clamps to max_delay immediately after anyway.
    match 2u32.checked_pow(attempt.min(31)) {
        Some(factor) => base.saturating_mul(factor),
        None => Duration::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_never_changes() {
        let base = Duration::from_millis(100);
        for attempt in 0..5 {
            assert_eq!(BackoffStrategy::Fixed.delay_for(attempt, base, None), base);
        }
    }

    #[test]
    fn linear_grows_by_multiples_of_base() {
        let base = Duration::from_millis(100);
        assert_eq!(
            BackoffStrategy::Linear.delay_for(0, base, None),
            Duration::from_millis(100)
        );
        assert_eq!(
            BackoffStrategy::Linear.delay_for(2, base, None),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn exponential_doubles_each_attempt() {
        let base = Duration::from_millis(100);
        assert_eq!(
            BackoffStrategy::Exponential.delay_for(0, base, None),
            Duration::from_millis(100)
        );
        assert_eq!(
            BackoffStrategy::Exponential.delay_for(3, base, None),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn jitter_stays_within_half_to_one_and_a_half_times_exponential() {
        let base = Duration::from_millis(100);
        let exp = BackoffStrategy::Exponential.delay_for(2, base, None);
        for _ in 0..200 {
            let jittered = BackoffStrategy::ExponentialJitter.delay_for(2, base, None);
            assert!(jittered.as_secs_f64() >= exp.as_secs_f64() * 0.5 - 0.001);
            assert!(jittered.as_secs_f64() <= exp.as_secs_f64() * 1.5 + 0.001);
        }
    }

    #[test]
    fn clamps_to_max_delay() {
        let base = Duration::from_secs(1);
        let delay = BackoffStrategy::Exponential.delay_for(20, base, Some(Duration::from_secs(5)));
        assert_eq!(delay, Duration::from_secs(5));
    }

    #[test]
    fn default_cap_is_thirty_seconds() {
        let base = Duration::from_secs(1);
        let delay = BackoffStrategy::Exponential.delay_for(20, base, None);
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn never_negative() {
        let base = Duration::from_millis(1);
        for attempt in 0..10 {
            assert!(BackoffStrategy::ExponentialJitter.delay_for(attempt, base, None) >= Duration::ZERO);
        }
    }
}
