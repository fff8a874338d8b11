//! Error types for the circuit breaker.

use thiserror::Error;

/// Errors returned when admission is requested from a [`crate::CircuitBreaker`].
#[derive(Debug, Clone, Error)]
pub enum CircuitBreakerError {
    /// The circuit is open; the call was not admitted.
    #[error("circuit '{name}' is open; call not permitted")]
    Open {
        /// The breaker's configured name.
        name: String,
    },
}

impl CircuitBreakerError {
    /// Returns true if the circuit rejected the call because it is open.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }
}
