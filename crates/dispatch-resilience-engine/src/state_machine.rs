//! The per-item state machine: admission (rate limiter, circuit breaker),
//! running the user operation under an optional per-attempt timeout,
//! retrying on transient failure, and the fallback/error-mode handoff.
//! `onCompleteItem` always fires exactly once, on every exit path.

use crate::guard::guard;
use crate::item::{Outcome, ResultEnvelope, SkipReason};
use crate::options::DispatchOptions;
use dispatch_resilience_adaptive::AdaptiveConcurrencyController;
use dispatch_resilience_circuitbreaker::CircuitBreaker;
use dispatch_resilience_core::telemetry::Counters;
use dispatch_resilience_core::DispatchError;
use dispatch_resilience_ratelimiter::{RateLimiter, RateLimiterError};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// A user-supplied per-item operation: takes the payload and a
/// per-attempt cancellation scope, returns `Result<R, E>`.
pub type UserOp<T, R, E> = Arc<dyn Fn(T, CancellationToken) -> BoxFuture<'static, Result<R, E>> + Send + Sync>;

/// Boxes a plain async closure into a [`UserOp`].
pub fn boxed_op<T, R, E, F, Fut>(f: F) -> UserOp<T, R, E>
where
    F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    Arc::new(move |payload, scope| Box::pin(f(payload, scope)))
}

/// The terminal envelope for one item, ready for the result sink or an
/// ordered-output buffer.
pub(crate) struct ItemOutcome<R, E> {
    pub(crate) envelope: ResultEnvelope<R, E>,
    /// Set when a failure's `onError` hook returned `true` (spec section
    /// 4.1: "handled, do not propagate"). Never meaningful unless
    /// `envelope.outcome` is `Failed`.
    pub(crate) handled: bool,
}

impl<R, E> ItemOutcome<R, E> {
    pub(crate) fn is_unhandled_failure(&self) -> bool {
        self.envelope.outcome.is_failed() && !self.handled
    }
}

/// Runs one item to a terminal outcome: admission through the rate
/// limiter and circuit breaker, the attempt/retry loop, and the
/// fallback/error-mode handoff on unrecoverable failure.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_item<T, R, E>(
    index: u64,
    payload: T,
    op: &UserOp<T, R, E>,
    options: &DispatchOptions<R, E>,
    counters: &Counters,
    invocation_cancel: &CancellationToken,
    rate_limiter: Option<&RateLimiter>,
    circuit_breaker: Option<&CircuitBreaker>,
    adaptive: Option<&AdaptiveConcurrencyController>,
) -> ItemOutcome<R, E>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    counters.item_started();
    if let Some(hook) = &options.on_start_item {
        guard("onStartItem", hook(index)).await;
    }

    let mut attempt: u32 = 1;

    loop {
        if invocation_cancel.is_cancelled() {
            return complete(index, counters, options, Outcome::Skipped(SkipReason::Cancelled)).await;
        }

        if let Some(limiter) = rate_limiter {
            match limiter.acquire(1, invocation_cancel).await {
                Ok(_waited) => {}
                Err(RateLimiterError::Cancelled) => {
                    return complete(
                        index,
                        counters,
                        options,
                        Outcome::Failed(DispatchError::Cancellation),
                    )
                    .await;
                }
                Err(RateLimiterError::Throttled { waited }) => {
                    if let Some(hook) = &options.on_throttle {
                        guard("onThrottle", hook()).await;
                    }
                    counters.throttled();
                    if options.throttled_is_transient && attempt <= options.max_retries {
                        retry_wait::<R, E>(index, attempt, None, options, invocation_cancel, counters).await;
                        attempt += 1;
                        continue;
                    }
                    return fail(index, counters, options, DispatchError::Throttled { waited }).await;
                }
            }
        }

        if let Some(breaker) = circuit_breaker {
            if breaker.try_acquire().is_err() {
                let err = DispatchError::CircuitOpen { name: None };
                if attempt <= options.max_retries {
                    retry_wait::<R, E>(index, attempt, None, options, invocation_cancel, counters).await;
                    attempt += 1;
                    continue;
                }
                return fail(index, counters, options, err).await;
            }
        }

        let scope = invocation_cancel.child_token();
        let attempt_start = Instant::now();
        let attempt_payload = payload.clone();
        let timed_out;
        let attempt_result = match options.per_item_timeout {
            Some(limit) => match tokio::time::timeout(limit, op(attempt_payload, scope.clone())).await {
                Ok(result) => {
                    timed_out = false;
                    Some(result)
                }
                Err(_elapsed) => {
                    scope.cancel();
                    timed_out = true;
                    None
                }
            },
            None => {
                timed_out = false;
                Some(op(attempt_payload, scope.clone()).await)
            }
        };
        let elapsed = attempt_start.elapsed();

        if timed_out {
            if let Some(breaker) = circuit_breaker {
                breaker.record_failure();
            }
            if let Some(adaptive) = adaptive {
                adaptive.record_outcome(false, elapsed);
            }
            let err = DispatchError::Timeout { index };
            if attempt <= options.max_retries {
                retry_wait::<R, E>(index, attempt, None, options, invocation_cancel, counters).await;
                attempt += 1;
                continue;
            }
            return fail(index, counters, options, err).await;
        }

        match attempt_result.expect("set when not timed_out") {
            Ok(value) => {
                if let Some(breaker) = circuit_breaker {
                    breaker.record_success();
                }
                if let Some(adaptive) = adaptive {
                    adaptive.record_outcome(true, elapsed);
                }
                counters.item_completed();
                if let Some(hook) = &options.on_complete_item {
                    guard("onCompleteItem", hook(index)).await;
                }
                return ItemOutcome {
                    envelope: ResultEnvelope {
                        index,
                        outcome: Outcome::Success(value),
                    },
                    handled: false,
                };
            }
            Err(user_error) => {
                if let Some(breaker) = circuit_breaker {
                    breaker.record_failure();
                }
                if let Some(adaptive) = adaptive {
                    adaptive.record_outcome(false, elapsed);
                }
                let transient = options.is_transient(&user_error);
                let circuit_allows = circuit_breaker.map(|b| b.is_call_permitted()).unwrap_or(true);
                if transient && attempt <= options.max_retries && circuit_allows {
                    retry_wait(index, attempt, Some(&user_error), options, invocation_cancel, counters).await;
                    attempt += 1;
                    continue;
                }
                let err = DispatchError::UserError {
                    index,
                    source: user_error,
                };
                return fail(index, counters, options, err).await;
            }
        }
    }
}

/// Terminal exit with no opportunity for fallback (cancellation, skip).
/// Still fires `onCompleteItem` exactly once.
async fn complete<R, E>(
    index: u64,
    counters: &Counters,
    options: &DispatchOptions<R, E>,
    outcome: Outcome<R, E>,
) -> ItemOutcome<R, E> {
    if !outcome.is_success() {
        counters.item_failed();
    }
    if let Some(hook) = &options.on_complete_item {
        guard("onCompleteItem", hook(index)).await;
    }
    ItemOutcome {
        envelope: ResultEnvelope { index, outcome },
        handled: false,
    }
}

/// An unrecoverable failure. Gives `onFallback` the chance to replace it
/// with a success; `onError` always observes the original error and may
/// mark it handled, in which case the failure must not be surfaced by
/// error-mode arbitration (spec section 4.1: "handled, do not propagate").
/// `onCompleteItem` fires exactly once either way.
async fn fail<R, E>(
    index: u64,
    counters: &Counters,
    options: &DispatchOptions<R, E>,
    error: DispatchError<E>,
) -> ItemOutcome<R, E>
where
    E: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    if let (Some(fallback), DispatchError::UserError { source, .. }) = (&options.on_fallback, &error) {
        let value = fallback(index, source.clone()).await;
        if let Some(on_error) = &options.on_error {
            guard("onError", on_error(index, source.clone())).await;
        }
        counters.item_completed();
        if let Some(hook) = &options.on_complete_item {
            guard("onCompleteItem", hook(index)).await;
        }
        return ItemOutcome {
            envelope: ResultEnvelope {
                index,
                outcome: Outcome::Success(value),
            },
            handled: true,
        };
    }

    counters.item_failed();
    let handled = if let (Some(on_error), DispatchError::UserError { source, .. }) = (&options.on_error, &error) {
        guard("onError", on_error(index, source.clone())).await.unwrap_or(false)
    } else {
        false
    };
    if let Some(hook) = &options.on_complete_item {
        guard("onCompleteItem", hook(index)).await;
    }
    ItemOutcome {
        envelope: ResultEnvelope {
            index,
            outcome: Outcome::Failed(error),
        },
        handled,
    }
}

/// Fires `onRetry` (when there's a user error to report) and sleeps for
/// the configured backoff, bailing out early if cancellation fires first.
async fn retry_wait<R, E>(
    index: u64,
    attempt: u32,
    user_error: Option<&E>,
    options: &DispatchOptions<R, E>,
    invocation_cancel: &CancellationToken,
    counters: &Counters,
) where
    E: Clone,
{
    let delay = options
        .backoff_strategy
        .delay_for(attempt - 1, options.base_delay, options.max_delay);

    if let (Some(hook), Some(err)) = (&options.on_retry, user_error) {
        guard("onRetry", hook(index, attempt, err.clone())).await;
    }
    counters.retried();

    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = invocation_cancel.cancelled() => {}
    }
}
