//! Events emitted by the retry policy.

use dispatch_resilience_core::ResilienceEvent;
use std::time::{Duration, Instant};

/// Events emitted while a per-item retry loop runs.
#[derive(Debug, Clone)]
pub enum RetryEvent {
    /// A retry attempt is about to be made after `delay`.
    Retry {
        pattern_name: String,
        timestamp: Instant,
        attempt: u32,
        delay: Duration,
    },
    /// The item succeeded, possibly after retries.
    Success {
        pattern_name: String,
        timestamp: Instant,
        attempts: u32,
    },
    /// The item failed after exhausting all retry attempts.
    Exhausted {
        pattern_name: String,
        timestamp: Instant,
        attempts: u32,
    },
}

impl ResilienceEvent for RetryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RetryEvent::Retry { .. } => "retry",
            RetryEvent::Success { .. } => "success",
            RetryEvent::Exhausted { .. } => "exhausted",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RetryEvent::Retry { timestamp, .. }
            | RetryEvent::Success { timestamp, .. }
            | RetryEvent::Exhausted { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            RetryEvent::Retry { pattern_name, .. }
            | RetryEvent::Success { pattern_name, .. }
            | RetryEvent::Exhausted { pattern_name, .. } => pattern_name,
        }
    }
}
