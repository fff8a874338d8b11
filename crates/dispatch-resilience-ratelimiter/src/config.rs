//! Configuration for the token-bucket rate limiter.

use crate::events::RateLimiterEvent;
use dispatch_resilience_core::EventListeners;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Async throttle callback, fired (coalesced) whenever an acquire has to wait.
pub type OnThrottle = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Configuration for [`crate::RateLimiter`].
pub struct RateLimiterConfig {
    pub(crate) tokens_per_second: f64,
    pub(crate) burst_capacity: u64,
    pub(crate) max_wait_per_acquire: Option<Duration>,
    pub(crate) on_throttle: Option<OnThrottle>,
    pub(crate) event_listeners: EventListeners<RateLimiterEvent>,
    pub(crate) name: String,
}

impl RateLimiterConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new()
    }
}

/// Builder for [`RateLimiterConfig`].
pub struct RateLimiterConfigBuilder {
    tokens_per_second: f64,
    burst_capacity: u64,
    max_wait_per_acquire: Option<Duration>,
    on_throttle: Option<OnThrottle>,
    event_listeners: EventListeners<RateLimiterEvent>,
    name: String,
}

impl Default for RateLimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterConfigBuilder {
    /// Creates a new builder with defaults: 10 tokens/sec, burst of 10, no
    /// wait cap.
    pub fn new() -> Self {
        Self {
            tokens_per_second: 10.0,
            burst_capacity: 10,
            max_wait_per_acquire: None,
            on_throttle: None,
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }

    /// Sets the steady-state refill rate.
    pub fn tokens_per_second(mut self, rate: f64) -> Self {
        self.tokens_per_second = rate;
        self
    }

    /// Sets the maximum number of tokens the bucket can hold.
    pub fn burst_capacity(mut self, capacity: u64) -> Self {
        self.burst_capacity = capacity;
        self
    }

    /// Sets the maximum time an `acquire` call will wait before failing with
    /// [`crate::error::RateLimiterError::Throttled`].
    ///
    /// Default: waits indefinitely.
    pub fn max_wait_per_acquire(mut self, duration: Duration) -> Self {
        self.max_wait_per_acquire = Some(duration);
        self
    }

    /// Registers an async callback fired whenever an acquire has to wait.
    /// Concurrent waiters coalesce into a single call per wait episode.
    pub fn on_throttle<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_throttle = Some(Arc::new(move || Box::pin(f())));
        self
    }

    /// Registers a listener for raw rate limiter events.
    pub fn on_event<L>(mut self, listener: L) -> Self
    where
        L: dispatch_resilience_core::EventListener<RateLimiterEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    /// Gives this limiter a name for observability.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> RateLimiterConfig {
        RateLimiterConfig {
            tokens_per_second: self.tokens_per_second,
            burst_capacity: self.burst_capacity,
            max_wait_per_acquire: self.max_wait_per_acquire,
            on_throttle: self.on_throttle,
            event_listeners: self.event_listeners,
            name: self.name,
        }
    }
}
