//! Retry policy configuration.

use crate::backoff::BackoffStrategy;
use crate::events::RetryEvent;
use dispatch_resilience_core::EventListeners;
use std::sync::Arc;
use std::time::Duration;

/// A pure description of how many times to retry and how long to wait
/// between attempts. The retry loop itself lives in the engine's per-item
/// state machine; this type only answers "should I retry?" and "how long
/// until the next attempt?".
pub struct RetryPolicy<E> {
    pub(crate) max_attempts: u32,
    pub(crate) strategy: BackoffStrategy,
    pub(crate) base_delay: Duration,
    pub(crate) max_delay: Option<Duration>,
    pub(crate) retry_predicate: Option<Arc<dyn Fn(&E) -> bool + Send + Sync>>,
    pub(crate) event_listeners: EventListeners<RetryEvent>,
    pub(crate) name: String,
}

impl<E> RetryPolicy<E> {
    /// Creates a new builder.
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    /// Total attempts permitted, including the initial (non-retry) call.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `error` should trigger a retry, per the configured predicate.
    /// Defaults to retrying every error.
    pub fn should_retry(&self, error: &E) -> bool {
        match &self.retry_predicate {
            Some(predicate) => predicate(error),
            None => true,
        }
    }

    /// The delay before retry attempt `attempt` (0-indexed, the delay
    /// before the first retry is `delay_for(0)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.strategy.delay_for(attempt, self.base_delay, self.max_delay)
    }

    /// Event sink for this policy's invocations.
    pub fn event_listeners(&self) -> &EventListeners<RetryEvent> {
        &self.event_listeners
    }

    /// This policy's name, for observability.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder<E> {
    max_attempts: u32,
    strategy: BackoffStrategy,
    base_delay: Duration,
    max_delay: Option<Duration>,
    retry_predicate: Option<Arc<dyn Fn(&E) -> bool + Send + Sync>>,
    event_listeners: EventListeners<RetryEvent>,
    name: String,
}

impl<E> Default for RetryPolicyBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryPolicyBuilder<E> {
    /// Creates a new builder with defaults: 3 total attempts, exponential
    /// backoff with a 100ms base delay, 30s max delay.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_millis(100),
            max_delay: None,
            retry_predicate: None,
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }

    /// Sets the total number of attempts (including the initial call).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Sets the backoff strategy.
    pub fn strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the base delay the strategy scales from.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Caps the computed delay. Default: 30 seconds.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Sets a predicate deciding which errors are retryable. Default:
    /// every error is retried.
    pub fn retry_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate = Some(Arc::new(predicate));
        self
    }

    /// Registers a listener for raw retry events.
    pub fn on_event<L>(mut self, listener: L) -> Self
    where
        L: dispatch_resilience_core::EventListener<RetryEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    /// Gives this policy a name for observability.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Builds the policy.
    pub fn build(self) -> RetryPolicy<E> {
        RetryPolicy {
            max_attempts: self.max_attempts,
            strategy: self.strategy,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            retry_predicate: self.retry_predicate,
            event_listeners: self.event_listeners,
            name: self.name,
        }
    }
}
