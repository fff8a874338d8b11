//! The public circuit breaker type.

use crate::circuit::{Circuit, CircuitSnapshot, CircuitState};
use crate::config::CircuitBreakerConfig;
use crate::error::CircuitBreakerError;
use std::sync::{Arc, Mutex};

/// Three-state circuit breaker (spec section 4.4). Cheap to clone; every
/// clone shares the same underlying state machine.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    circuit: Arc<Mutex<Circuit>>,
}

impl CircuitBreaker {
    /// Builds a new circuit breaker from `config`.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            circuit: Arc::new(Mutex::new(Circuit::new())),
        }
    }

    /// Requests admission for a call. Returns `Err(CircuitBreakerError::Open)`
    /// if the circuit is currently open.
    pub fn try_acquire(&self) -> Result<(), CircuitBreakerError> {
        let mut circuit = self.circuit.lock().unwrap();
        if circuit.try_acquire(&self.config) {
            Ok(())
        } else {
            Err(CircuitBreakerError::Open {
                name: self.config.name.clone(),
            })
        }
    }

    /// Returns whether a call would currently be admitted, without
    /// consuming the half-open trial slot.
    pub fn is_call_permitted(&self) -> bool {
        self.circuit.lock().unwrap().is_call_permitted(&self.config)
    }

    /// Records that an admitted call succeeded.
    pub fn record_success(&self) {
        self.circuit.lock().unwrap().record_success(&self.config);
    }

    /// Records that an admitted call failed.
    pub fn record_failure(&self) {
        self.circuit.lock().unwrap().record_failure(&self.config);
    }

    /// Returns the breaker's current state.
    pub fn state(&self) -> CircuitState {
        self.circuit.lock().unwrap().state()
    }

    /// Returns a point-in-time snapshot of the breaker's window counters.
    pub fn snapshot(&self) -> CircuitSnapshot {
        self.circuit.lock().unwrap().snapshot(&self.config)
    }
}
