//! The public rate limiter type.

use crate::bucket::TokenBucket;
use crate::config::RateLimiterConfig;
use crate::error::{RateLimiterError, Result};
use crate::events::RateLimiterEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

struct Inner {
    bucket: Mutex<TokenBucket>,
    config: RateLimiterConfig,
    /// Coalesces `on_throttle` across concurrently-waiting callers so a
    /// burst of waiters doesn't amplify into a burst of callback invocations.
    throttle_in_flight: AtomicBool,
}

/// Token-bucket admission controller (spec section 4.3). Cheap to clone;
/// every clone shares the same bucket state, so a single `RateLimiter` may
/// be shared across many concurrent dispatch workers or across invocations.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    /// Builds a new rate limiter from `config`.
    pub fn new(config: RateLimiterConfig) -> Self {
        let bucket = TokenBucket::new(config.tokens_per_second, config.burst_capacity);
        Self {
            inner: Arc::new(Inner {
                bucket: Mutex::new(bucket),
                config,
                throttle_in_flight: AtomicBool::new(false),
            }),
        }
    }

    /// Acquires `n` tokens, waiting as necessary. Cancellation-aware: if
    /// `cancel` fires while waiting, returns [`RateLimiterError::Cancelled`].
    /// If the wait would exceed `max_wait_per_acquire`, returns
    /// [`RateLimiterError::Throttled`] without waiting that long.
    pub async fn acquire(&self, n: u64, cancel: &CancellationToken) -> Result<Duration> {
        let deadline = self.inner.config.max_wait_per_acquire;
        let start = Instant::now();
        let n = n as f64;

        loop {
            let attempt = {
                let mut bucket = self.inner.bucket.lock().unwrap();
                bucket.try_acquire(n)
            };

            match attempt {
                Ok(()) => {
                    let waited = start.elapsed();
                    if waited > Duration::ZERO {
                        self.emit_throttle_resolved(waited).await;
                    } else {
                        self.emit_granted();
                    }
                    return Ok(waited);
                }
                Err(wait_hint) => {
                    if let Some(max_wait) = deadline {
                        if start.elapsed() + wait_hint > max_wait {
                            let waited = start.elapsed();
                            self.emit_wait_exceeded(waited);
                            return Err(RateLimiterError::Throttled { waited });
                        }
                    }

                    self.maybe_fire_on_throttle();

                    tokio::select! {
                        _ = tokio::time::sleep(wait_hint) => {}
                        _ = cancel.cancelled() => return Err(RateLimiterError::Cancelled),
                    }
                }
            }
        }
    }

    /// Current available tokens, for observability/tests.
    pub fn available_tokens(&self) -> f64 {
        self.inner.bucket.lock().unwrap().available_tokens()
    }

    fn maybe_fire_on_throttle(&self) {
        if self
            .inner
            .throttle_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Some(on_throttle) = self.inner.config.on_throttle.clone() {
                tokio::spawn(async move {
                    on_throttle().await;
                });
            }
        }
    }

    fn emit_granted(&self) {
        self.inner
            .config
            .event_listeners
            .emit(&RateLimiterEvent::PermitGranted {
                pattern_name: self.inner.config.name.clone(),
                timestamp: Instant::now(),
            });

        #[cfg(feature = "metrics")]
        counter!("ratelimiter_permits_granted_total", "ratelimiter" => self.inner.config.name.clone()).increment(1);
    }

    async fn emit_throttle_resolved(&self, waited: Duration) {
        self.inner.throttle_in_flight.store(false, Ordering::SeqCst);
        self.inner
            .config
            .event_listeners
            .emit(&RateLimiterEvent::Throttled {
                pattern_name: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                waited,
            });

        #[cfg(feature = "metrics")]
        {
            counter!("ratelimiter_throttled_total", "ratelimiter" => self.inner.config.name.clone()).increment(1);
            gauge!("ratelimiter_available_tokens", "ratelimiter" => self.inner.config.name.clone())
                .set(self.available_tokens());
        }
    }

    fn emit_wait_exceeded(&self, waited: Duration) {
        self.inner.throttle_in_flight.store(false, Ordering::SeqCst);
        self.inner
            .config
            .event_listeners
            .emit(&RateLimiterEvent::WaitExceeded {
                pattern_name: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                waited,
            });

        #[cfg(feature = "metrics")]
        counter!("ratelimiter_wait_exceeded_total", "ratelimiter" => self.inner.config.name.clone()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimiterConfig;

    #[tokio::test]
    async fn grants_burst_immediately() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::builder()
                .tokens_per_second(5.0)
                .burst_capacity(5)
                .build(),
        );
        let cancel = CancellationToken::new();
        for _ in 0..5 {
            let waited = limiter.acquire(1, &cancel).await.unwrap();
            assert_eq!(waited, Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn waits_for_refill_beyond_burst() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::builder()
                .tokens_per_second(20.0)
                .burst_capacity(1)
                .build(),
        );
        let cancel = CancellationToken::new();
        limiter.acquire(1, &cancel).await.unwrap();
        let waited = limiter.acquire(1, &cancel).await.unwrap();
        assert!(waited > Duration::ZERO);
    }

    #[tokio::test]
    async fn throttled_error_when_wait_exceeds_max() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::builder()
                .tokens_per_second(1.0)
                .burst_capacity(1)
                .max_wait_per_acquire(Duration::from_millis(10))
                .build(),
        );
        let cancel = CancellationToken::new();
        limiter.acquire(1, &cancel).await.unwrap();
        let result = limiter.acquire(1, &cancel).await;
        assert!(matches!(result, Err(RateLimiterError::Throttled { .. })));
    }

    #[tokio::test]
    async fn cancellation_while_waiting_is_reported() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::builder()
                .tokens_per_second(1.0)
                .burst_capacity(1)
                .build(),
        );
        let cancel = CancellationToken::new();
        limiter.acquire(1, &cancel).await.unwrap();
        cancel.cancel();
        let result = limiter.acquire(1, &cancel).await;
        assert!(matches!(result, Err(RateLimiterError::Cancelled)));
    }
}
