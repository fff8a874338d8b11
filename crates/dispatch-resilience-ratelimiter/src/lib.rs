//! Token-bucket rate limiting for the dispatch engine (spec section 4.3).

mod bucket;
mod config;
mod error;
mod events;
mod limiter;

pub use config::{OnThrottle, RateLimiterConfig, RateLimiterConfigBuilder};
pub use error::{RateLimiterError, Result};
pub use events::RateLimiterEvent;
pub use limiter::RateLimiter;
