//! Shared error type for the dispatch engine and its resilience layers.
//!
//! [`DispatchError`] plays the role `tower-resilience`'s `ResilienceError<E>`
//! plays for tower middleware stacks: one enum that every layer's failure
//! converts into, so callers never write per-layer `From` boilerplate.

use std::fmt;
use std::time::Duration;

/// Unified error type surfaced by a dispatch invocation.
///
/// `E` is the application error type returned by the user-supplied
/// operation.
#[derive(Debug, Clone)]
pub enum DispatchError<E> {
    /// A nil source/op, negative concurrency, or otherwise malformed
    /// [`DispatchOptions`](https://docs.rs/dispatch-resilience-engine).
    /// Raised synchronously before dispatch begins.
    InvalidArgument {
        /// Human-readable description of what was invalid.
        message: String,
    },

    /// The user operation returned an error that was not retried to success
    /// (or exceeded `maxRetries`) and was not handled by `onError`/`onFallback`.
    UserError {
        /// Index of the input item that failed.
        index: u64,
        /// The underlying application error.
        source: E,
    },

    /// The per-attempt scope (bounded by `perItemTimeout`) expired.
    /// Classified as transient by default; eligible for retry.
    Timeout {
        /// Index of the input item that timed out.
        index: u64,
    },

    /// The caller's cancellation token fired, or the engine entered
    /// fail-fast wind-down. Never retried.
    Cancellation,

    /// The circuit breaker rejected the call while open.
    CircuitOpen {
        /// Circuit breaker name, if configured.
        name: Option<String>,
    },

    /// The rate limiter's wait exceeded `maxWaitPerAcquire`.
    Throttled {
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// An observability callback raised or panicked. Never propagates to the
    /// invocation result; reported to the telemetry sink only.
    CallbackFailed {
        /// Name of the callback that failed (e.g. `"onStartItem"`).
        callback: &'static str,
    },

    /// Aggregate of per-item errors collected under `CollectAndContinue`.
    Aggregate(Vec<DispatchError<E>>),
}

impl<E> DispatchError<E> {
    /// Returns `true` if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::Timeout { .. })
    }

    /// Returns `true` if this is a cancellation error.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DispatchError::Cancellation)
    }

    /// Returns `true` if this is a circuit-open rejection.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, DispatchError::CircuitOpen { .. })
    }

    /// Returns `true` if this is a throttled rejection.
    pub fn is_throttled(&self) -> bool {
        matches!(self, DispatchError::Throttled { .. })
    }

    /// Returns `true` if this is an aggregate of per-item errors.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, DispatchError::Aggregate(_))
    }

    /// Returns `true` if this error kind is transient by default
    /// (timeouts and circuit-open rejections; throttling is configurable
    /// and defaults to non-transient here).
    pub fn is_transient_by_default(&self) -> bool {
        matches!(
            self,
            DispatchError::Timeout { .. } | DispatchError::CircuitOpen { .. }
        )
    }

    /// Extracts the application error, if this is a `UserError` variant.
    pub fn into_application_error(self) -> Option<E> {
        match self {
            DispatchError::UserError { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Maps the application error using a function.
    pub fn map_application<F, T>(self, f: F) -> DispatchError<T>
    where
        F: FnOnce(E) -> T + Clone,
    {
        match self {
            DispatchError::InvalidArgument { message } => DispatchError::InvalidArgument { message },
            DispatchError::UserError { index, source } => DispatchError::UserError {
                index,
                source: f(source),
            },
            DispatchError::Timeout { index } => DispatchError::Timeout { index },
            DispatchError::Cancellation => DispatchError::Cancellation,
            DispatchError::CircuitOpen { name } => DispatchError::CircuitOpen { name },
            DispatchError::Throttled { waited } => DispatchError::Throttled { waited },
            DispatchError::CallbackFailed { callback } => DispatchError::CallbackFailed { callback },
            DispatchError::Aggregate(errors) => DispatchError::Aggregate(
                errors
                    .into_iter()
                    .map(|e| e.map_application(f.clone()))
                    .collect(),
            ),
        }
    }
}

impl<E> fmt::Display for DispatchError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::InvalidArgument { message } => {
                write!(f, "invalid argument: {}", message)
            }
            DispatchError::UserError { index, source } => {
                write!(f, "item {} failed: {}", index, source)
            }
            DispatchError::Timeout { index } => write!(f, "item {} timed out", index),
            DispatchError::Cancellation => write!(f, "dispatch cancelled"),
            DispatchError::CircuitOpen { name } => match name {
                Some(n) => write!(f, "circuit breaker '{}' is open", n),
                None => write!(f, "circuit breaker is open"),
            },
            DispatchError::Throttled { waited } => {
                write!(f, "rate limited, waited {:?} before giving up", waited)
            }
            DispatchError::CallbackFailed { callback } => {
                write!(f, "callback '{}' failed", callback)
            }
            DispatchError::Aggregate(errors) => {
                write!(f, "{} item(s) failed", errors.len())
            }
        }
    }
}

impl<E> std::error::Error for DispatchError<E> where E: std::error::Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct TestError;

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error")
        }
    }

    impl std::error::Error for TestError {}

    const _: () = {
        const fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<DispatchError<TestError>>();
    };

    #[test]
    fn aggregate_counts_inner_errors() {
        let err: DispatchError<TestError> = DispatchError::Aggregate(vec![
            DispatchError::UserError {
                index: 0,
                source: TestError,
            },
            DispatchError::Timeout { index: 1 },
        ]);
        assert!(err.is_aggregate());
        assert_eq!(err.to_string(), "2 item(s) failed");
    }

    #[test]
    fn map_application_preserves_infrastructure_variants() {
        let err: DispatchError<TestError> = DispatchError::Timeout { index: 7 };
        let mapped = err.map_application(|_| 42usize);
        assert!(mapped.is_timeout());
    }
}
