//! The circuit breaker state machine (spec section 4.4).

use crate::config::CircuitBreakerConfig;
use crate::events::CircuitBreakerEvent;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// The three states a circuit breaker can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls are admitted; outcomes are tracked in the sliding window.
    Closed,
    /// Calls are rejected until `open_timeout` elapses.
    Open,
    /// A single trial call is admitted to probe recovery.
    HalfOpen,
}

struct Outcome {
    at: Instant,
    failed: bool,
}

/// Point-in-time view of the breaker's internal counters, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub window_total: usize,
    pub window_failures: usize,
}

pub(crate) struct Circuit {
    state: CircuitState,
    last_state_change: Instant,
    window: VecDeque<Outcome>,
    consecutive_successes: usize,
}

impl Circuit {
    pub(crate) fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            last_state_change: Instant::now(),
            window: VecDeque::new(),
            consecutive_successes: 0,
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn snapshot(&mut self, config: &CircuitBreakerConfig) -> CircuitSnapshot {
        self.evict_expired(config.sampling_duration);
        CircuitSnapshot {
            state: self.state,
            window_total: self.window.len(),
            window_failures: self.window.iter().filter(|o| o.failed).count(),
        }
    }

    fn evict_expired(&mut self, sampling_duration: Duration) {
        let now = Instant::now();
        while let Some(front) = self.window.front() {
            if now.duration_since(front.at) > sampling_duration {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Asks whether a call may proceed. Handles the Open -> HalfOpen
    /// transition internally when `open_timeout` has elapsed.
    pub(crate) fn try_acquire(&mut self, config: &CircuitBreakerConfig) -> bool {
        match self.state {
            CircuitState::Closed => {
                self.emit_permitted(config);
                true
            }
            CircuitState::Open => {
                if self.last_state_change.elapsed() >= config.open_timeout {
                    self.transition_to(CircuitState::HalfOpen, config);
                    self.emit_permitted(config);
                    true
                } else {
                    self.emit_rejected(config);
                    false
                }
            }
            CircuitState::HalfOpen => {
                // Exactly one trial call in flight at a time.
                self.emit_rejected(config);
                false
            }
        }
    }

    /// Like `try_acquire` but does not consume the HalfOpen trial slot,
    /// used by callers that just want to peek at admissibility.
    pub(crate) fn is_call_permitted(&self, config: &CircuitBreakerConfig) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.last_state_change.elapsed() >= config.open_timeout,
            CircuitState::HalfOpen => false,
        }
    }

    pub(crate) fn record_success(&mut self, config: &CircuitBreakerConfig) {
        match self.state {
            CircuitState::HalfOpen => {
                self.consecutive_successes += 1;
                self.emit_success(config);
                if self.consecutive_successes >= config.success_threshold {
                    self.transition_to(CircuitState::Closed, config);
                }
            }
            CircuitState::Closed => {
                self.window.push_back(Outcome {
                    at: Instant::now(),
                    failed: false,
                });
                self.emit_success(config);
                self.evaluate_window(config);
            }
            CircuitState::Open => {
                self.emit_success(config);
            }
        }
    }

    pub(crate) fn record_failure(&mut self, config: &CircuitBreakerConfig) {
        match self.state {
            CircuitState::HalfOpen => {
                self.emit_failure(config);
                self.transition_to(CircuitState::Open, config);
            }
            CircuitState::Closed => {
                self.window.push_back(Outcome {
                    at: Instant::now(),
                    failed: true,
                });
                self.emit_failure(config);
                self.evaluate_window(config);
            }
            CircuitState::Open => {
                self.emit_failure(config);
            }
        }
    }

    fn evaluate_window(&mut self, config: &CircuitBreakerConfig) {
        self.evict_expired(config.sampling_duration);
        let total = self.window.len();
        if total < config.failure_threshold {
            return;
        }
        let failures = self.window.iter().filter(|o| o.failed).count();
        if failures >= config.failure_threshold {
            self.transition_to(CircuitState::Open, config);
        }
    }

    fn transition_to(&mut self, state: CircuitState, config: &CircuitBreakerConfig) {
        if self.state == state {
            return;
        }
        let from_state = self.state;

        config
            .event_listeners
            .emit(&CircuitBreakerEvent::StateTransition {
                pattern_name: config.name.clone(),
                timestamp: Instant::now(),
                from_state,
                to_state: state,
            });

        #[cfg(feature = "tracing")]
        tracing::info!(circuit = %config.name, from = ?from_state, to = ?state, "circuit breaker state transition");

        #[cfg(feature = "metrics")]
        {
            counter!(
                "circuitbreaker_transitions_total",
                "circuitbreaker" => config.name.clone(),
                "from" => state_label(from_state),
                "to" => state_label(state),
            )
            .increment(1);
            gauge!("circuitbreaker_state", "circuitbreaker" => config.name.clone())
                .set(state as u8 as f64);
        }

        self.state = state;
        self.last_state_change = Instant::now();
        self.window.clear();
        self.consecutive_successes = 0;
    }

    fn emit_permitted(&self, config: &CircuitBreakerConfig) {
        config
            .event_listeners
            .emit(&CircuitBreakerEvent::CallPermitted {
                pattern_name: config.name.clone(),
                timestamp: Instant::now(),
                state: self.state,
            });
    }

    fn emit_rejected(&self, config: &CircuitBreakerConfig) {
        config
            .event_listeners
            .emit(&CircuitBreakerEvent::CallRejected {
                pattern_name: config.name.clone(),
                timestamp: Instant::now(),
            });

        #[cfg(feature = "metrics")]
        counter!("circuitbreaker_rejected_total", "circuitbreaker" => config.name.clone())
            .increment(1);
    }

    fn emit_success(&self, config: &CircuitBreakerConfig) {
        config
            .event_listeners
            .emit(&CircuitBreakerEvent::SuccessRecorded {
                pattern_name: config.name.clone(),
                timestamp: Instant::now(),
                state: self.state,
            });
    }

    fn emit_failure(&self, config: &CircuitBreakerConfig) {
        config
            .event_listeners
            .emit(&CircuitBreakerEvent::FailureRecorded {
                pattern_name: config.name.clone(),
                timestamp: Instant::now(),
                state: self.state,
            });
    }
}

#[cfg(feature = "metrics")]
fn state_label(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failure_threshold: usize, success_threshold: usize) -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .sampling_duration(Duration::from_secs(60))
            .failure_threshold(failure_threshold)
            .open_timeout(Duration::from_millis(20))
            .success_threshold(success_threshold)
            .build()
    }

    #[test]
    fn opens_after_failure_threshold_reached() {
        let config = config(3, 1);
        let mut circuit = Circuit::new();
        for _ in 0..3 {
            assert!(circuit.try_acquire(&config));
            circuit.record_failure(&config);
        }
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[test]
    fn stays_closed_below_threshold() {
        let config = config(3, 1);
        let mut circuit = Circuit::new();
        circuit.try_acquire(&config);
        circuit.record_failure(&config);
        circuit.try_acquire(&config);
        circuit.record_failure(&config);
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[test]
    fn open_rejects_until_timeout_then_half_opens() {
        let config = config(1, 1);
        let mut circuit = Circuit::new();
        circuit.try_acquire(&config);
        circuit.record_failure(&config);
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(!circuit.try_acquire(&config));

        std::thread::sleep(Duration::from_millis(30));
        assert!(circuit.try_acquire(&config));
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let config = config(1, 1);
        let mut circuit = Circuit::new();
        circuit.try_acquire(&config);
        circuit.record_failure(&config);
        std::thread::sleep(Duration::from_millis(30));
        circuit.try_acquire(&config);
        circuit.record_failure(&config);
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_requires_consecutive_successes_to_close() {
        let config = config(1, 2);
        let mut circuit = Circuit::new();
        circuit.try_acquire(&config);
        circuit.record_failure(&config);
        std::thread::sleep(Duration::from_millis(30));
        circuit.try_acquire(&config);
        circuit.record_success(&config);
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        // a fresh open timeout wait is not needed; half-open already admits a trial call
        circuit.record_success(&config);
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[test]
    fn outcomes_outside_sampling_window_are_forgotten() {
        let config = CircuitBreakerConfig::builder()
            .sampling_duration(Duration::from_millis(20))
            .failure_threshold(2)
            .open_timeout(Duration::from_secs(30))
            .build();
        let mut circuit = Circuit::new();
        circuit.try_acquire(&config);
        circuit.record_failure(&config);
        std::thread::sleep(Duration::from_millis(30));
        circuit.try_acquire(&config);
        circuit.record_failure(&config);
        assert_eq!(circuit.state(), CircuitState::Closed);
    }
}
