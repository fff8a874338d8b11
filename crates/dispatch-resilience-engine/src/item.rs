//! Per-item data model (spec section 3): the input item, its terminal
//! outcome, the result envelope the engine produces for it, and the
//! per-attempt record fed to `onRetry`.

use dispatch_resilience_core::DispatchError;
use std::time::Duration;

/// An item drawn from the source, tagged with its position (`index`) in
/// source order. `index` is the identity used for retries, ordering, and
/// callbacks for the lifetime of the item.
pub(crate) struct InputItem<T> {
    pub(crate) index: u64,
    pub(crate) payload: T,
}

/// Why an item never ran its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The engine entered fail-fast wind-down before this item was reached.
    FailFast,
    /// The caller's cancellation token fired before this item was reached.
    Cancelled,
}

/// The terminal state of one input item (spec section 3).
#[derive(Debug, Clone)]
pub enum Outcome<R, E> {
    /// The operation succeeded, possibly after retries, or a fallback was
    /// applied after an unrecoverable failure.
    Success(R),
    /// The operation failed and no fallback/handled-error escape applied.
    Failed(DispatchError<E>),
    /// The item never ran, e.g. fail-fast wind-down skipped the remaining
    /// queue.
    Skipped(SkipReason),
}

impl<R, E> Outcome<R, E> {
    /// Returns the success value, if any.
    pub fn success(&self) -> Option<&R> {
        match self {
            Outcome::Success(r) => Some(r),
            _ => None,
        }
    }

    /// Returns true if this outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Returns true if this outcome is a failure.
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// Returns true if this item was skipped.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }
}

/// The result of dispatching one input item: its original index plus its
/// terminal outcome (spec section 3).
#[derive(Debug, Clone)]
pub struct ResultEnvelope<R, E> {
    pub index: u64,
    pub outcome: Outcome<R, E>,
}

/// One iteration of the per-item retry loop, fed to `onRetry` (spec
/// section 3).
#[derive(Debug, Clone)]
pub struct AttemptRecord<E> {
    pub index: u64,
    pub attempt_number: u32,
    pub error: Option<E>,
    pub elapsed: Duration,
}
