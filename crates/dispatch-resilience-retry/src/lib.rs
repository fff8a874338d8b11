//! Pure backoff math and retry policy for the per-item state machine
//! (spec section 4.6). The retry loop itself lives in
//! `dispatch-resilience-engine`; this crate only answers "should I retry"
//! and "how long until the next attempt".

mod backoff;
mod config;
mod events;

pub use backoff::BackoffStrategy;
pub use config::{RetryPolicy, RetryPolicyBuilder};
pub use events::RetryEvent;
