//! Events emitted by the adaptive concurrency controller.

use dispatch_resilience_core::ResilienceEvent;
use std::time::Instant;

/// Events emitted by [`crate::AdaptiveConcurrencyController`].
#[derive(Debug, Clone)]
pub enum AdaptiveConcurrencyEvent {
    /// A sampling pass ran and computed a new target limit (which may equal
    /// the current one).
    Sampled {
        pattern_name: String,
        timestamp: Instant,
        p95_latency_ms: f64,
        success_rate: f64,
        observations: usize,
    },
    /// The effective concurrency limit changed.
    LimitChanged {
        pattern_name: String,
        timestamp: Instant,
        old_limit: usize,
        new_limit: usize,
    },
}

impl ResilienceEvent for AdaptiveConcurrencyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AdaptiveConcurrencyEvent::Sampled { .. } => "sampled",
            AdaptiveConcurrencyEvent::LimitChanged { .. } => "limit_changed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            AdaptiveConcurrencyEvent::Sampled { timestamp, .. }
            | AdaptiveConcurrencyEvent::LimitChanged { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            AdaptiveConcurrencyEvent::Sampled { pattern_name, .. }
            | AdaptiveConcurrencyEvent::LimitChanged { pattern_name, .. } => pattern_name,
        }
    }
}
