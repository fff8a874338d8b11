//! Error types for the rate limiter.

/// Errors that can occur when acquiring permits from a [`crate::RateLimiter`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimiterError {
    /// The wait required to acquire a permit exceeded `max_wait_per_acquire`.
    #[error("rate limiter wait of {waited:?} exceeded the configured maximum")]
    Throttled {
        /// How long the caller waited before giving up.
        waited: std::time::Duration,
    },
    /// The caller's cancellation token fired while waiting for a permit.
    #[error("cancelled while waiting for a rate limiter permit")]
    Cancelled,
}

/// Result type for rate limiter operations.
pub type Result<T> = std::result::Result<T, RateLimiterError>;
