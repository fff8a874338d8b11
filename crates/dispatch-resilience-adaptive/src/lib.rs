//! Adaptive concurrency control for the dispatch engine (spec section 4.5).
//!
//! Periodically samples recent p95 latency and success rate and adjusts an
//! effective concurrency limit accordingly. The engine consults
//! [`AdaptiveConcurrencyController::current_limit`] whenever a worker asks
//! for a new item; the controller itself never touches a semaphore or
//! worker pool directly.

mod config;
mod controller;
mod events;

pub use config::{
    AdaptiveConcurrencyConfig, AdaptiveConcurrencyConfigBuilder, DecreaseStrategy,
    IncreaseStrategy,
};
pub use controller::{AdaptiveConcurrencyController, AdaptiveConcurrencyHandle};
pub use events::AdaptiveConcurrencyEvent;
