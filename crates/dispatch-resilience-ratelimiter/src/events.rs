//! Events emitted by the rate limiter.

use dispatch_resilience_core::ResilienceEvent;
use std::time::{Duration, Instant};

/// Events emitted by [`crate::RateLimiter`].
#[derive(Debug, Clone)]
pub enum RateLimiterEvent {
    /// A permit was granted without waiting.
    PermitGranted {
        pattern_name: String,
        timestamp: Instant,
    },
    /// A permit was granted after waiting `waited`.
    Throttled {
        pattern_name: String,
        timestamp: Instant,
        waited: Duration,
    },
    /// The wait exceeded `max_wait_per_acquire`; the acquire failed.
    WaitExceeded {
        pattern_name: String,
        timestamp: Instant,
        waited: Duration,
    },
}

impl ResilienceEvent for RateLimiterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RateLimiterEvent::PermitGranted { .. } => "permit_granted",
            RateLimiterEvent::Throttled { .. } => "throttled",
            RateLimiterEvent::WaitExceeded { .. } => "wait_exceeded",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RateLimiterEvent::PermitGranted { timestamp, .. }
            | RateLimiterEvent::Throttled { timestamp, .. }
            | RateLimiterEvent::WaitExceeded { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            RateLimiterEvent::PermitGranted { pattern_name, .. }
            | RateLimiterEvent::Throttled { pattern_name, .. }
            | RateLimiterEvent::WaitExceeded { pattern_name, .. } => pattern_name,
        }
    }
}
