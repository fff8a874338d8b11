//! `dispatch-resilience`: a bounded-concurrency parallel-dispatch engine
//! with retries, rate limiting, circuit breaking, adaptive concurrency, and
//! a multi-stage pipeline composer built on top of it.
//!
//! This crate is a thin facade over the workspace's component crates,
//! re-exported as named modules, plus the five canonical top-level
//! operations (spec section 4.9): [`map_parallel`] (collected),
//! [`map_parallel_stream`] (streaming), [`for_each_parallel`],
//! [`batch_select_parallel`], and [`filter_parallel`]. Reach for the
//! component crates directly ([`core`], [`ratelimiter`], [`circuitbreaker`],
//! [`retry`], [`adaptive`], [`engine`]) when building a [`pipeline`].
//!
//! # Example
//!
//! ```no_run
//! use dispatch_resilience::{map_parallel, DispatchOptions};
//! use futures::stream;
//! use futures::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() {
//! let options: DispatchOptions<u64, String> = DispatchOptions::builder()
//!     .max_concurrency(8)
//!     .build();
//!
//! let report = map_parallel(
//!     stream::iter(0u64..100).boxed(),
//!     |n, _scope| async move { Ok(n * 2) },
//!     options,
//!     CancellationToken::new(),
//! )
//! .await;
//!
//! assert!(report.terminal_error.is_none());
//! # }
//! ```

pub use dispatch_resilience_core as core;
pub use dispatch_resilience_adaptive as adaptive;
pub use dispatch_resilience_circuitbreaker as circuitbreaker;
pub use dispatch_resilience_engine as engine;
pub use dispatch_resilience_ratelimiter as ratelimiter;
pub use dispatch_resilience_retry as retry;

pub use engine::{
    dispatch_collect, dispatch_stream, DispatchError, DispatchOptions, DispatchOptionsBuilder, DispatchReport,
    DispatchStream, ErrorMode, InputStream,
};
pub use engine::{
    BatchSelectStage, BatchStage, BufferStage, CustomStage, FilterStage, Pipeline, PipelineBuilder, PipelineContext,
    PipelineError, PipelineHooks, PipelineReport, PipelineSummary, SelectManyStage, Stage, StageOutcome, TapStage,
    ThrottleStage, TransformStage,
};

use futures::stream::StreamExt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

fn invalid_argument<E>(message: impl Into<String>) -> DispatchError<E> {
    DispatchError::InvalidArgument { message: message.into() }
}

/// **Map-parallel, collected** (spec section 4.9): runs `op` over every
/// item of `source` and returns every result once the source is exhausted.
pub async fn map_parallel<T, R, E, F, Fut>(
    source: InputStream<T>,
    op: F,
    options: DispatchOptions<R, E>,
    cancel: CancellationToken,
) -> DispatchReport<R, E>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    E: Clone + Send + Sync + 'static,
    F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let op = engine::boxed_op(op);
    dispatch_collect(source, None, op, options, cancel).await
}

/// **Map-parallel, streaming** (spec section 4.9): runs `op` over every
/// item of `source`, yielding each result as soon as it is ready (or, under
/// ordered output, as soon as its turn arrives).
pub fn map_parallel_stream<T, R, E, F, Fut>(
    source: InputStream<T>,
    op: F,
    options: DispatchOptions<R, E>,
    cancel: CancellationToken,
) -> DispatchStream<R, E>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    E: Clone + Send + Sync + 'static,
    F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let op = engine::boxed_op(op);
    dispatch_stream(source, None, op, options, cancel)
}

/// **For-each-parallel** (spec section 4.9): like [`map_parallel`], but the
/// operation's result type is `()` — useful when `op` is run purely for its
/// side effects.
pub async fn for_each_parallel<T, E, F, Fut>(
    source: InputStream<T>,
    op: F,
    options: DispatchOptions<(), E>,
    cancel: CancellationToken,
) -> DispatchReport<(), E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
    F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    map_parallel(source, op, options, cancel).await
}

/// **Batch-select-parallel** (spec section 4.9): groups `batch_size`
/// consecutive items of `source` and runs `op` over each group. The final
/// group may be smaller than `batch_size` if the source doesn't divide
/// evenly. Rejects `batch_size == 0` with
/// [`DispatchError::InvalidArgument`].
pub async fn batch_select_parallel<T, R, E, F, Fut>(
    source: InputStream<T>,
    batch_size: usize,
    op: F,
    options: DispatchOptions<R, E>,
    cancel: CancellationToken,
) -> Result<DispatchReport<R, E>, DispatchError<E>>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    E: Clone + Send + Sync + 'static,
    F: Fn(Vec<T>, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    if batch_size == 0 {
        return Err(invalid_argument("batch_size must be at least 1"));
    }
    let batches: InputStream<Vec<T>> = source.chunks(batch_size).boxed();
    let op = engine::boxed_op(op);
    Ok(dispatch_collect(batches, None, op, options, cancel).await)
}

/// **Filter-parallel** (spec section 4.9): runs an async `predicate` over
/// every item of `source` and returns the items for which it resolved
/// `true`, in the order the underlying dispatch produced them.
pub async fn filter_parallel<T, E, F, Fut>(
    source: InputStream<T>,
    predicate: F,
    options: DispatchOptions<Option<T>, E>,
    cancel: CancellationToken,
) -> Result<Vec<T>, DispatchError<E>>
where
    T: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    let op = engine::boxed_op(move |item: T, _scope: CancellationToken| {
        let survives = predicate(item.clone());
        async move {
            let keep = survives.await;
            Ok::<Option<T>, E>(if keep { Some(item) } else { None })
        }
    });

    let report = dispatch_collect(source, None, op, options, cancel).await;
    if let Some(error) = report.terminal_error {
        return Err(error);
    }
    Ok(report
        .envelopes
        .into_iter()
        .filter_map(|envelope| match envelope.outcome {
            engine::Outcome::Success(Some(item)) => Some(item),
            _ => None,
        })
        .collect())
}
