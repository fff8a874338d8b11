//! The scheduler proper: input pump, worker pool, result sink, error-mode
//! arbitration, and the observability trackers that wrap an invocation.
//!
//! Three roles run concurrently, joined by bounded channels:
//! - the *input pump* assigns sequential indices and enqueues into a
//!   bounded input queue, blocking when it's full;
//! - the *worker pool* (one task per worker slot) dequeues, runs the
//!   per-item state machine, and enqueues the result envelope;
//! - the *result sink* drains the output queue, feeding the ordered-output
//!   buffer when configured, and either streams results or accumulates
//!   them for a collected call.

use crate::item::{Outcome, ResultEnvelope};
use crate::options::{DispatchOptions, ErrorMode};
use crate::reorder::OrderedBuffer;
use crate::state_machine::{run_item, ItemOutcome, UserOp};
use dispatch_resilience_adaptive::AdaptiveConcurrencyController;
use dispatch_resilience_core::telemetry::Counters;
use dispatch_resilience_core::DispatchError;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const SAMPLER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A boxed, owned input source. Covers both finite sources (`Vec`,
/// iterators turned into a stream) and genuinely unbounded streams.
pub type InputStream<T> = BoxStream<'static, T>;

/// The outcome of a collected dispatch invocation.
pub struct DispatchReport<R, E> {
    /// Every envelope the invocation produced. Under `BestEffort`, failed
    /// items are omitted per the error-mode contract; under every other
    /// mode, every drawn item is represented exactly once.
    pub envelopes: Vec<ResultEnvelope<R, E>>,
    /// `Some` when the invocation itself failed: a singleton error for
    /// `FailFast`/cancellation, or an `Aggregate` for `CollectAndContinue`.
    pub terminal_error: Option<DispatchError<E>>,
}

impl<R, E> DispatchReport<R, E> {
    /// Extracts just the success values, in the envelope order they were
    /// collected in (index order under `orderedOutput`, completion order
    /// otherwise).
    pub fn successes(&self) -> Vec<&R> {
        self.envelopes.iter().filter_map(|e| e.outcome.success()).collect()
    }
}

/// Handle to a running streaming dispatch invocation: the live result
/// stream, plus a receiver for the terminal error (if any), resolved once
/// the stream is fully drained.
pub struct DispatchStream<R, E> {
    pub results: BoxStream<'static, ResultEnvelope<R, E>>,
    pub terminal_error: oneshot::Receiver<Option<DispatchError<E>>>,
}

struct Shared<R, E> {
    options: Arc<DispatchOptions<R, E>>,
    counters: Counters,
    cancel: CancellationToken,
    adaptive: Option<AdaptiveConcurrencyController>,
}

/// Runs one dispatch invocation to completion and collects every result.
pub async fn dispatch_collect<T, R, E>(
    source: InputStream<T>,
    total_hint: Option<u64>,
    op: UserOp<T, R, E>,
    options: DispatchOptions<R, E>,
    cancel: CancellationToken,
) -> DispatchReport<R, E>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    let (tx, mut rx) = spawn_pipeline(source, total_hint, op, Arc::new(options), cancel);

    let mut envelopes = Vec::new();
    while let Some(envelope) = rx.recv().await {
        envelopes.push(envelope);
    }
    let terminal_error = tx.await.unwrap_or(None);

    DispatchReport {
        envelopes,
        terminal_error,
    }
}

/// Runs one dispatch invocation, returning a live stream of results plus a
/// receiver for the eventual terminal error.
pub fn dispatch_stream<T, R, E>(
    source: InputStream<T>,
    total_hint: Option<u64>,
    op: UserOp<T, R, E>,
    options: DispatchOptions<R, E>,
    cancel: CancellationToken,
) -> DispatchStream<R, E>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    let (join, rx) = spawn_pipeline(source, total_hint, op, options, cancel);

    let (terminal_tx, terminal_rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = join.await.unwrap_or(None);
        let _ = terminal_tx.send(result);
    });

    DispatchStream {
        results: receiver_into_stream(rx),
        terminal_error: terminal_rx,
    }
}

fn receiver_into_stream<R, E>(rx: mpsc::Receiver<ResultEnvelope<R, E>>) -> BoxStream<'static, ResultEnvelope<R, E>>
where
    R: Send + 'static,
    E: Send + 'static,
{
    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

/// Spawns the input pump, worker pool, and result sink for one invocation.
/// Returns a join handle resolving to the terminal error (if any) once the
/// sink finishes, and the envelope receiver the caller drains (directly,
/// for a collected call; or exposes as a stream).
fn spawn_pipeline<T, R, E>(
    source: InputStream<T>,
    total_hint: Option<u64>,
    op: UserOp<T, R, E>,
    options: DispatchOptions<R, E>,
    cancel: CancellationToken,
) -> (
    tokio::task::JoinHandle<Option<DispatchError<E>>>,
    mpsc::Receiver<ResultEnvelope<R, E>>,
)
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    let started_at = Instant::now();
    let counters = Counters::new();
    let options = Arc::new(options);
    // A child of the caller's token: cancelling it (FailFast wind-down)
    // never reaches back and cancels the caller's own handle.
    let cancel = cancel.child_token();

    let adaptive = options
        .adaptive_concurrency
        .clone()
        .map(|config| AdaptiveConcurrencyController::spawn((*config).clone()));
    let adaptive_controller = adaptive.as_ref().map(|(ctl, _)| ctl.clone());
    let adaptive_sampler_handle = adaptive.map(|(_, handle)| handle);

    let progress_sampler = options.progress.as_ref().map(|opts| {
        dispatch_resilience_core::sampler::spawn(
            counters.clone(),
            started_at,
            total_hint,
            opts.interval,
            {
                let on_sample = Arc::clone(&opts.on_sample);
                move |snapshot| on_sample(snapshot)
            },
        )
    });
    let metrics_sampler = options.metrics.as_ref().map(|opts| {
        dispatch_resilience_core::sampler::spawn(
            counters.clone(),
            started_at,
            total_hint,
            opts.interval,
            {
                let on_sample = Arc::clone(&opts.on_sample);
                move |snapshot| on_sample(snapshot)
            },
        )
    });

    let shared = Arc::new(Shared {
        options: Arc::clone(&options),
        counters: counters.clone(),
        cancel: cancel.clone(),
        adaptive: adaptive_controller,
    });

    let (input_tx, input_rx) = mpsc::channel(options.input_queue_capacity);
    let (output_tx, output_rx) = mpsc::channel(options.input_queue_capacity);

    spawn_input_pump(source, input_tx, shared.clone());

    let worker_count = shared.options.static_concurrency_ceiling().max(1);
    let input_rx = Arc::new(tokio::sync::Mutex::new(input_rx));
    let mut worker_handles = Vec::with_capacity(worker_count);
    for ordinal in 0..worker_count {
        worker_handles.push(spawn_worker(
            ordinal,
            Arc::clone(&input_rx),
            output_tx.clone(),
            op.clone(),
            shared.clone(),
        ));
    }
    drop(output_tx);

    let (report_tx, report_rx) = mpsc::channel(shared.options.input_queue_capacity);
    let sink_shared = shared.clone();
    // The sink must drain `output_rx` concurrently with the worker pool, not
    // after it: `output_tx` is bounded, so once it fills, workers blocked on
    // `send` would never finish for the join below to even reach the sink.
    let sink_handle = tokio::spawn(run_result_sink(output_rx, report_tx, sink_shared.clone()));

    let join = tokio::spawn(async move {
        for handle in worker_handles {
            let _ = handle.await;
        }

        let terminal_error = sink_handle.await.unwrap_or(None);

        if let Some(handle) = progress_sampler {
            handle.shutdown(SAMPLER_SHUTDOWN_TIMEOUT).await;
        }
        if let Some(handle) = metrics_sampler {
            handle.shutdown(SAMPLER_SHUTDOWN_TIMEOUT).await;
        }
        if let Some(handle) = adaptive_sampler_handle {
            handle.shutdown(SAMPLER_SHUTDOWN_TIMEOUT).await;
        }

        // The hard final-sample guarantee: one more synchronous sample
        // after every worker has terminated, reading the fully
        // SeqCst-fenced counters.
        let final_snapshot = sink_shared.counters.snapshot(started_at, total_hint);
        if let Some(progress) = &sink_shared.options.progress {
            (progress.on_sample)(final_snapshot).await;
        }
        if let Some(metrics) = &sink_shared.options.metrics {
            (metrics.on_sample)(final_snapshot).await;
        }

        terminal_error
    });

    (join, report_rx)
}

fn spawn_input_pump<T, R, E>(
    mut source: InputStream<T>,
    input_tx: mpsc::Sender<(u64, T)>,
    shared: Arc<Shared<R, E>>,
) where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    tokio::spawn(async move {
        let mut index: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => break,
                next = source.next() => {
                    match next {
                        Some(payload) => {
                            if input_tx.send((index, payload)).await.is_err() {
                                break;
                            }
                            index += 1;
                        }
                        None => break,
                    }
                }
            }
        }
        drop(input_tx);

        shared.counters.drained();
        if let Some(hook) = &shared.options.on_drain {
            let _ = crate::guard::guard("onDrain", hook()).await;
        }
    });
}

fn spawn_worker<T, R, E>(
    ordinal: usize,
    input_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<(u64, T)>>>,
    output_tx: mpsc::Sender<ItemOutcome<R, E>>,
    op: UserOp<T, R, E>,
    shared: Arc<Shared<R, E>>,
) -> tokio::task::JoinHandle<()>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        shared.counters.worker_started();

        loop {
            if let Some(adaptive) = &shared.adaptive {
                while ordinal >= adaptive.current_limit() {
                    if shared.cancel.is_cancelled() {
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(25)) => {}
                        _ = shared.cancel.cancelled() => break,
                    }
                }
            }

            let next = {
                let mut guard = input_rx.lock().await;
                guard.recv().await
            };
            let Some((index, payload)) = next else {
                break;
            };

            let outcome = run_item(
                index,
                payload,
                &op,
                &shared.options,
                &shared.counters,
                &shared.cancel,
                shared.options.rate_limit.as_ref(),
                shared.options.circuit_breaker.as_ref(),
                shared.adaptive.as_ref(),
            )
            .await;

            if outcome.is_unhandled_failure() && shared.options.error_mode == ErrorMode::FailFast {
                shared.cancel.cancel();
            }

            if output_tx.send(outcome).await.is_err() {
                break;
            }
        }

        shared.counters.worker_stopped();
    })
}

async fn run_result_sink<R, E>(
    mut output_rx: mpsc::Receiver<ItemOutcome<R, E>>,
    report_tx: mpsc::Sender<ResultEnvelope<R, E>>,
    shared: Arc<Shared<R, E>>,
) -> Option<DispatchError<E>>
where
    R: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    let mut reorder = shared
        .options
        .ordered_output
        .then(|| OrderedBuffer::new(shared.options.input_queue_capacity));
    let mut collected_errors: Vec<DispatchError<E>> = Vec::new();
    let mut cancellation_seen = false;

    while let Some(item_outcome) = output_rx.recv().await {
        let ItemOutcome { envelope, handled } = item_outcome;

        if let Outcome::Failed(DispatchError::Cancellation) = &envelope.outcome {
            cancellation_seen = true;
        }

        match shared.options.error_mode {
            ErrorMode::FailFast => {
                let is_unhandled_failure = envelope.outcome.is_failed() && !handled;
                emit(&mut reorder, &report_tx, envelope).await;
                if is_unhandled_failure {
                    break;
                }
            }
            ErrorMode::CollectAndContinue => {
                if !handled {
                    if let Outcome::Failed(err) = &envelope.outcome {
                        collected_errors.push(err.clone());
                    }
                }
                emit(&mut reorder, &report_tx, envelope).await;
            }
            ErrorMode::BestEffort => match &envelope.outcome {
                Outcome::Failed(_) if !handled => {}
                Outcome::Skipped(_) => {}
                _ => {
                    emit(&mut reorder, &report_tx, envelope).await;
                }
            },
        }
    }

    if cancellation_seen && shared.options.error_mode != ErrorMode::BestEffort {
        return Some(DispatchError::Cancellation);
    }

    match shared.options.error_mode {
        ErrorMode::FailFast => {
            // The failing envelope itself already carries the error; the
            // caller inspects `envelopes` for it. No separate singleton is
            // needed unless cancellation intervened (handled above).
            None
        }
        ErrorMode::CollectAndContinue if !collected_errors.is_empty() => {
            Some(DispatchError::Aggregate(collected_errors))
        }
        _ => None,
    }
}

async fn emit<R, E>(
    reorder: &mut Option<OrderedBuffer<R, E>>,
    report_tx: &mpsc::Sender<ResultEnvelope<R, E>>,
    envelope: ResultEnvelope<R, E>,
) where
    R: Send + 'static,
    E: Send + 'static,
{
    match reorder {
        Some(buffer) => {
            for ready in buffer.submit(envelope).await {
                if report_tx.send(ready).await.is_err() {
                    return;
                }
            }
        }
        None => {
            let _ = report_tx.send(envelope).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::boxed_op;
    use futures::stream;

    fn tokens(n: u64) -> InputStream<u64> {
        stream::iter(0..n).boxed()
    }

    #[tokio::test]
    async fn collects_every_item_in_completion_order_when_unordered() {
        let options: DispatchOptions<u64, String> = DispatchOptions::builder()
            .max_concurrency(4)
            .build();
        let op: UserOp<u64, u64, String> = boxed_op(|n, _scope| async move { Ok(n * 2) });

        let report = dispatch_collect(tokens(10), Some(10), op, options, CancellationToken::new()).await;

        assert!(report.terminal_error.is_none());
        let mut values: Vec<u64> = report.successes().into_iter().copied().collect();
        values.sort();
        assert_eq!(values, (0..10).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn ordered_output_preserves_index_order() {
        let options: DispatchOptions<u64, String> = DispatchOptions::builder()
            .max_concurrency(4)
            .ordered_output(true)
            .build();
        let op: UserOp<u64, u64, String> = boxed_op(|n, _scope| async move {
            if n % 2 == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(n)
        });

        let report = dispatch_collect(tokens(20), Some(20), op, options, CancellationToken::new()).await;

        let values: Vec<u64> = report.successes().into_iter().copied().collect();
        assert_eq!(values, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn fail_fast_stops_after_first_unhandled_failure() {
        let options: DispatchOptions<u64, String> = DispatchOptions::builder()
            .max_concurrency(1)
            .build();
        let op: UserOp<u64, u64, String> = boxed_op(|n, _scope| async move {
            if n == 3 {
                Err("boom".to_string())
            } else {
                Ok(n)
            }
        });

        let report = dispatch_collect(tokens(10), Some(10), op, options, CancellationToken::new()).await;

        assert!(report.envelopes.iter().any(|e| e.outcome.is_failed()));
    }

    #[tokio::test]
    async fn best_effort_drops_failures_from_output() {
        let options: DispatchOptions<u64, String> = DispatchOptions::builder()
            .max_concurrency(4)
            .error_mode(ErrorMode::BestEffort)
            .build();
        let op: UserOp<u64, u64, String> = boxed_op(|n, _scope| async move {
            if n == 4 {
                Err("boom".to_string())
            } else {
                Ok(n * 2)
            }
        });

        let report = dispatch_collect(tokens(9), Some(9), op, options, CancellationToken::new()).await;

        assert!(report.terminal_error.is_none());
        assert_eq!(report.envelopes.len(), 8);
        assert!(report.envelopes.iter().all(|e| e.outcome.is_success()));
    }

    #[tokio::test]
    async fn collect_and_continue_reports_an_aggregate() {
        let options: DispatchOptions<u64, String> = DispatchOptions::builder()
            .max_concurrency(4)
            .error_mode(ErrorMode::CollectAndContinue)
            .build();
        let op: UserOp<u64, u64, String> = boxed_op(|n, _scope| async move {
            if n % 3 == 0 {
                Err("transient-looking".to_string())
            } else {
                Ok(n)
            }
        });

        let report = dispatch_collect(tokens(6), Some(6), op, options, CancellationToken::new()).await;

        assert_eq!(report.envelopes.len(), 6);
        match report.terminal_error {
            Some(DispatchError::Aggregate(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected an aggregate error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_source_drains_immediately() {
        let options: DispatchOptions<u64, String> = DispatchOptions::builder().build();
        let op: UserOp<u64, u64, String> = boxed_op(|n, _scope| async move { Ok(n) });

        let report = dispatch_collect(tokens(0), Some(0), op, options, CancellationToken::new()).await;

        assert!(report.envelopes.is_empty());
        assert!(report.terminal_error.is_none());
    }
}
