//! Three-state circuit breaker for the dispatch engine (spec section 4.4).

mod breaker;
mod circuit;
mod config;
mod error;
mod events;

pub use breaker::CircuitBreaker;
pub use circuit::{CircuitSnapshot, CircuitState};
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use error::CircuitBreakerError;
pub use events::CircuitBreakerEvent;
