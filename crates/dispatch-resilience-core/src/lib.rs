//! Core infrastructure for dispatch-resilience.
//!
//! This crate provides shared functionality used across the dispatch engine
//! and its resilience layers:
//! - Event system for observability ([`events`])
//! - The unified error type ([`error::DispatchError`])
//! - Process-wide and per-invocation telemetry counters ([`telemetry`])
//! - The periodic sampler task backing progress/metrics callbacks ([`sampler`])

pub mod error;
pub mod events;
pub mod sampler;
pub mod telemetry;

pub use error::DispatchError;
pub use events::{EventListener, EventListeners, FnListener, ResilienceEvent};
pub use telemetry::{Counters, GlobalCounters, Snapshot};
