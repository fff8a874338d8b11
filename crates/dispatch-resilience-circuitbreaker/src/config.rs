//! Configuration for the circuit breaker.

use crate::circuit::CircuitState;
use crate::events::CircuitBreakerEvent;
use dispatch_resilience_core::{EventListeners, FnListener};
use std::time::Duration;

/// Configuration for [`crate::CircuitBreaker`] (spec section 4.4).
pub struct CircuitBreakerConfig {
    pub(crate) sampling_duration: Duration,
    pub(crate) failure_threshold: usize,
    pub(crate) open_timeout: Duration,
    pub(crate) success_threshold: usize,
    pub(crate) event_listeners: EventListeners<CircuitBreakerEvent>,
    pub(crate) name: String,
}

impl CircuitBreakerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

/// Builder for [`CircuitBreakerConfig`].
pub struct CircuitBreakerConfigBuilder {
    sampling_duration: Duration,
    failure_threshold: usize,
    open_timeout: Duration,
    success_threshold: usize,
    event_listeners: EventListeners<CircuitBreakerEvent>,
    name: String,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    /// Creates a new builder with defaults: a 30s sampling window, 5
    /// failures to open, a 30s open timeout, and 1 consecutive success to
    /// close from half-open.
    pub fn new() -> Self {
        Self {
            sampling_duration: Duration::from_secs(30),
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            success_threshold: 1,
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }

    /// Sets the duration of the sliding window outcomes are tracked in
    /// while the circuit is closed.
    pub fn sampling_duration(mut self, duration: Duration) -> Self {
        self.sampling_duration = duration;
        self
    }

    /// Sets the number of failures within `sampling_duration` that trips
    /// the circuit open.
    pub fn failure_threshold(mut self, n: usize) -> Self {
        self.failure_threshold = n;
        self
    }

    /// Sets how long the circuit stays open before allowing a trial call.
    pub fn open_timeout(mut self, duration: Duration) -> Self {
        self.open_timeout = duration;
        self
    }

    /// Sets the number of consecutive successes in half-open required to
    /// close the circuit again.
    pub fn success_threshold(mut self, n: usize) -> Self {
        self.success_threshold = n;
        self
    }

    /// Registers a listener for raw circuit breaker events.
    pub fn on_event<L>(mut self, listener: L) -> Self
    where
        L: dispatch_resilience_core::EventListener<CircuitBreakerEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    /// Registers a callback fired on every state transition.
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::StateTransition {
                    from_state,
                    to_state,
                    ..
                } = event
                {
                    f(*from_state, *to_state);
                }
            }));
        self
    }

    /// Gives this breaker a name for observability.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            sampling_duration: self.sampling_duration,
            failure_threshold: self.failure_threshold,
            open_timeout: self.open_timeout,
            success_threshold: self.success_threshold,
            event_listeners: self.event_listeners,
            name: self.name,
        }
    }
}
