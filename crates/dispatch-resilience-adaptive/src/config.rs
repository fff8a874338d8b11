//! Configuration for the adaptive concurrency controller.

use crate::events::AdaptiveConcurrencyEvent;
use dispatch_resilience_core::{EventListener, EventListeners, FnListener};
use std::time::Duration;

/// How the limit grows when the system has headroom (spec section 4.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IncreaseStrategy {
    /// Add a fixed amount per sampling interval.
    Additive(usize),
    /// Multiply the current limit by a factor per sampling interval.
    Multiplicative(f64),
}

/// How the limit shrinks when the system is degraded (spec section 4.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecreaseStrategy {
    /// Subtract a fixed amount per sampling interval.
    Additive(usize),
    /// Halve the current limit per sampling interval.
    Halving,
}

/// Configuration for [`crate::AdaptiveConcurrencyController`] (spec section 4.5).
#[derive(Clone)]
pub struct AdaptiveConcurrencyConfig {
    pub(crate) min: usize,
    pub(crate) max: usize,
    pub(crate) initial: usize,
    pub(crate) sample_interval: Duration,
    pub(crate) target_latency: Duration,
    pub(crate) min_success_rate: f64,
    pub(crate) increase_strategy: IncreaseStrategy,
    pub(crate) decrease_strategy: DecreaseStrategy,
    pub(crate) event_listeners: EventListeners<AdaptiveConcurrencyEvent>,
    pub(crate) name: String,
}

impl AdaptiveConcurrencyConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> AdaptiveConcurrencyConfigBuilder {
        AdaptiveConcurrencyConfigBuilder::new()
    }
}

/// Builder for [`AdaptiveConcurrencyConfig`].
pub struct AdaptiveConcurrencyConfigBuilder {
    min: usize,
    max: usize,
    initial: usize,
    sample_interval: Duration,
    target_latency: Duration,
    min_success_rate: f64,
    increase_strategy: IncreaseStrategy,
    decrease_strategy: DecreaseStrategy,
    event_listeners: EventListeners<AdaptiveConcurrencyEvent>,
    name: String,
}

impl Default for AdaptiveConcurrencyConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveConcurrencyConfigBuilder {
    /// Creates a new builder with defaults: limit range `[1, 64]` starting
    /// at 10, sampled every second, a 200ms target latency, a 0.9 minimum
    /// success rate, additive increase by 1 and halving decrease.
    pub fn new() -> Self {
        Self {
            min: 1,
            max: 64,
            initial: 10,
            sample_interval: Duration::from_secs(1),
            target_latency: Duration::from_millis(200),
            min_success_rate: 0.9,
            increase_strategy: IncreaseStrategy::Additive(1),
            decrease_strategy: DecreaseStrategy::Halving,
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }

    /// Sets the floor the limit never drops below.
    pub fn min(mut self, min: usize) -> Self {
        self.min = min;
        self
    }

    /// Sets the ceiling the limit never exceeds.
    pub fn max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    /// Sets the starting limit, clamped to `[min, max]` at build time.
    pub fn initial(mut self, initial: usize) -> Self {
        self.initial = initial;
        self
    }

    /// Sets how often the controller re-evaluates the limit.
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Sets the latency below which the system is considered healthy.
    pub fn target_latency(mut self, latency: Duration) -> Self {
        self.target_latency = latency;
        self
    }

    /// Sets the success rate below which the limit is decreased.
    pub fn min_success_rate(mut self, rate: f64) -> Self {
        self.min_success_rate = rate;
        self
    }

    /// Sets the growth strategy applied when the system has headroom.
    pub fn increase_strategy(mut self, strategy: IncreaseStrategy) -> Self {
        self.increase_strategy = strategy;
        self
    }

    /// Sets the shrink strategy applied when the system is degraded.
    pub fn decrease_strategy(mut self, strategy: DecreaseStrategy) -> Self {
        self.decrease_strategy = strategy;
        self
    }

    /// Registers a listener for raw adaptive-concurrency events.
    pub fn on_event<L>(mut self, listener: L) -> Self
    where
        L: EventListener<AdaptiveConcurrencyEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    /// Registers a callback fired whenever the effective limit changes.
    pub fn on_concurrency_change<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &AdaptiveConcurrencyEvent| {
                if let AdaptiveConcurrencyEvent::LimitChanged {
                    old_limit,
                    new_limit,
                    ..
                } = event
                {
                    f(*old_limit, *new_limit);
                }
            }));
        self
    }

    /// Gives this controller a name for observability.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> AdaptiveConcurrencyConfig {
        AdaptiveConcurrencyConfig {
            min: self.min,
            max: self.max,
            initial: self.initial.clamp(self.min, self.max),
            sample_interval: self.sample_interval,
            target_latency: self.target_latency,
            min_success_rate: self.min_success_rate,
            increase_strategy: self.increase_strategy,
            decrease_strategy: self.decrease_strategy,
            event_listeners: self.event_listeners,
            name: self.name,
        }
    }
}
