//! Property tests for the dispatch engine's ten quantified invariants.
//!
//! Invariants tested (numbered to match the quantified-invariant list):
//! 1. FailFast with a never-failing op returns exactly `|S|` results.
//! 2. Ordered output matches `map(op, S)` index-for-index.
//! 3. Peak concurrent `op` calls never exceeds `maxConcurrency`.
//! 4. CollectAndContinue: successes + failures == `|S|`.
//! 6. A transient failure retried to success fires `onRetry` exactly `k` times.
//! 7. `onStartItem`/`onCompleteItem` fire exactly once per item, start before complete.
//! 9. `itemsStarted >= itemsCompleted + itemsFailed` at every sample, equal at the end.
//! 10. Cancelling twice produces the same terminal error as cancelling once.

use dispatch_resilience::{map_parallel, ErrorMode};
use dispatch_resilience_engine::DispatchOptions;
use futures::stream::{self, StreamExt};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

fn rt() -> Runtime {
    Runtime::new().unwrap()
}

fn items(n: usize) -> dispatch_resilience_engine::InputStream<u64> {
    stream::iter((0..n as u64).collect::<Vec<_>>()).boxed()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Invariant 1: FailFast, an op that never fails, returns one result
    /// per source item.
    #[test]
    fn failfast_never_fails_collects_every_item(n in 0usize..30) {
        rt().block_on(async {
            let options: DispatchOptions<u64, String> = DispatchOptions::builder().max_concurrency(4).build();
            let report = map_parallel(items(n), |x, _scope| async move { Ok(x) }, options, CancellationToken::new()).await;

            prop_assert!(report.terminal_error.is_none());
            prop_assert_eq!(report.envelopes.len(), n);
            Ok(())
        })?;
    }

    /// Invariant 2: ordered output matches `map(op, S)` index-for-index.
    #[test]
    fn ordered_output_matches_index_order(n in 1usize..30, concurrency in 1usize..8) {
        rt().block_on(async {
            let options: DispatchOptions<u64, String> = DispatchOptions::builder()
                .max_concurrency(concurrency)
                .ordered_output(true)
                .build();
            let report = map_parallel(items(n), |x, _scope| async move { Ok(x * 3) }, options, CancellationToken::new()).await;

            let produced: Vec<u64> = report.envelopes.iter().map(|e| *e.outcome.success().unwrap()).collect();
            let expected: Vec<u64> = (0..n as u64).map(|x| x * 3).collect();
            prop_assert_eq!(produced, expected);
            Ok(())
        })?;
    }

    /// Invariant 3: peak concurrently-active `op` calls never exceeds
    /// `maxConcurrency` (adaptive concurrency disabled).
    #[test]
    fn peak_concurrency_never_exceeds_the_cap(n in 1usize..40, concurrency in 1usize..8) {
        rt().block_on(async {
            let active = Arc::new(AtomicI64::new(0));
            let peak = Arc::new(AtomicI64::new(0));

            let options: DispatchOptions<u64, String> = DispatchOptions::builder().max_concurrency(concurrency).build();

            let active_for_op = Arc::clone(&active);
            let peak_for_op = Arc::clone(&peak);
            let report = map_parallel(
                items(n),
                move |x, _scope| {
                    let active = Arc::clone(&active_for_op);
                    let peak = Arc::clone(&peak_for_op);
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(x)
                    }
                },
                options,
                CancellationToken::new(),
            )
            .await;

            prop_assert!(report.terminal_error.is_none());
            prop_assert!(peak.load(Ordering::SeqCst) as usize <= concurrency);
            Ok(())
        })?;
    }

    /// Invariant 4: under CollectAndContinue, successes + failures == `|S|`,
    /// and the aggregate error's inner-error count equals the failure count.
    #[test]
    fn collect_and_continue_accounts_for_every_item(n in 1usize..30, fail_every in 2u64..6) {
        rt().block_on(async {
            let options: DispatchOptions<u64, String> = DispatchOptions::builder()
                .max_concurrency(4)
                .error_mode(ErrorMode::CollectAndContinue)
                .build();

            let report = map_parallel(
                items(n),
                move |x, _scope| async move {
                    if x % fail_every == 0 { Err("boom".to_string()) } else { Ok(x) }
                },
                options,
                CancellationToken::new(),
            )
            .await;

            let failures = report.envelopes.iter().filter(|e| e.outcome.is_failed()).count();
            let successes = report.envelopes.iter().filter(|e| e.outcome.is_success()).count();
            prop_assert_eq!(successes + failures, n);

            if failures > 0 {
                let error = report.terminal_error.expect("failures should surface an aggregate");
                match error {
                    dispatch_resilience_engine::DispatchError::Aggregate(inner) => {
                        prop_assert_eq!(inner.len(), failures);
                    }
                    other => prop_assert!(false, "expected an aggregate, got {:?}", other),
                }
            } else {
                prop_assert!(report.terminal_error.is_none());
            }
            Ok(())
        })?;
    }

    /// Invariant 6: an item that fails transiently `k` times then succeeds
    /// (with `k <= maxRetries`) fires `onRetry` exactly `k` times for that
    /// item and ends up `Success`.
    #[test]
    fn transient_failures_are_retried_exactly_k_times(k in 0u32..4, max_retries in 4u32..8) {
        rt().block_on(async {
            let attempts = Arc::new(AtomicU32::new(0));
            let retry_calls = Arc::new(AtomicU32::new(0));

            let attempts_for_op = Arc::clone(&attempts);
            let retry_calls_for_hook = Arc::clone(&retry_calls);

            let options: DispatchOptions<u64, String> = DispatchOptions::builder()
                .max_concurrency(1)
                .max_retries(max_retries)
                .base_delay(Duration::from_millis(1))
                .is_transient(|_: &String| true)
                .on_retry(move |_index, _attempt, _error| {
                    retry_calls_for_hook.fetch_add(1, Ordering::SeqCst);
                    async move {}
                })
                .build();

            let report = map_parallel(
                items(1),
                move |x, _scope| {
                    let attempts = Arc::clone(&attempts_for_op);
                    let k = k;
                    async move {
                        let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                        if (attempt as u32) < k {
                            Err("transient".to_string())
                        } else {
                            Ok(x)
                        }
                    }
                },
                options,
                CancellationToken::new(),
            )
            .await;

            prop_assert!(report.terminal_error.is_none());
            prop_assert!(report.envelopes[0].outcome.is_success());
            prop_assert_eq!(retry_calls.load(Ordering::SeqCst), k);
            Ok(())
        })?;
    }

    /// Invariant 7: `onStartItem`/`onCompleteItem` fire exactly once per
    /// item, and for every item the start is observed before the complete.
    #[test]
    fn start_and_complete_hooks_fire_once_each_in_order(n in 1usize..20) {
        rt().block_on(async {
            // The state machine awaits `onStartItem` before running the op and
            // `onCompleteItem` after its terminal outcome is known, both on
            // the same per-item task, so a shared sequence counter records
            // happens-before for free: every item's start sequence number
            // must be strictly less than its complete sequence number.
            let sequence = Arc::new(AtomicU64::new(0));
            let starts: Arc<Mutex<HashMap<u64, (u32, u64)>>> = Arc::new(Mutex::new(HashMap::new()));
            let completes: Arc<Mutex<HashMap<u64, (u32, u64)>>> = Arc::new(Mutex::new(HashMap::new()));

            let starts_for_hook = Arc::clone(&starts);
            let completes_for_hook = Arc::clone(&completes);
            let sequence_for_start = Arc::clone(&sequence);
            let sequence_for_complete = Arc::clone(&sequence);

            let options: DispatchOptions<u64, String> = DispatchOptions::builder()
                .max_concurrency(4)
                .on_start_item(move |index| {
                    let starts = Arc::clone(&starts_for_hook);
                    let sequence = Arc::clone(&sequence_for_start);
                    async move {
                        let seq = sequence.fetch_add(1, Ordering::SeqCst);
                        let entry = starts.lock().unwrap().entry(index).or_insert((0, seq)).clone();
                        starts.lock().unwrap().insert(index, (entry.0 + 1, entry.1));
                    }
                })
                .on_complete_item(move |index| {
                    let completes = Arc::clone(&completes_for_hook);
                    let sequence = Arc::clone(&sequence_for_complete);
                    async move {
                        let seq = sequence.fetch_add(1, Ordering::SeqCst);
                        let entry = completes.lock().unwrap().entry(index).or_insert((0, seq)).clone();
                        completes.lock().unwrap().insert(index, (entry.0 + 1, entry.1));
                    }
                })
                .build();

            let report = map_parallel(items(n), |x, _scope| async move { Ok(x) }, options, CancellationToken::new()).await;
            prop_assert!(report.terminal_error.is_none());

            let starts = starts.lock().unwrap();
            let completes = completes.lock().unwrap();
            prop_assert_eq!(starts.len(), n);
            prop_assert_eq!(completes.len(), n);
            for index in 0..n as u64 {
                let (start_count, start_seq) = *starts.get(&index).unwrap();
                let (complete_count, complete_seq) = *completes.get(&index).unwrap();
                prop_assert_eq!(start_count, 1);
                prop_assert_eq!(complete_count, 1);
                prop_assert!(start_seq < complete_seq, "item {} completed before it started", index);
            }
            Ok(())
        })?;
    }

    /// Invariant 9: `itemsStarted >= itemsCompleted + itemsFailed` holds at
    /// every progress sample, and equality holds once the invocation ends.
    #[test]
    fn started_never_trails_finished_and_equals_it_at_the_end(n in 1usize..30) {
        rt().block_on(async {
            let violations = Arc::new(AtomicU64::new(0));
            let violations_for_hook = Arc::clone(&violations);

            let progress = dispatch_resilience_engine::ProgressOptions::new(Duration::from_millis(5), move |snapshot| {
                let violations = Arc::clone(&violations_for_hook);
                async move {
                    if snapshot.items_started < snapshot.items_completed + snapshot.items_failed {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });

            let options: DispatchOptions<u64, String> = DispatchOptions::builder().max_concurrency(4).progress(progress).build();
            let report = map_parallel(
                items(n),
                |x, _scope| async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    Ok(x)
                },
                options,
                CancellationToken::new(),
            )
            .await;

            prop_assert!(report.terminal_error.is_none());
            prop_assert_eq!(violations.load(Ordering::SeqCst), 0);
            prop_assert_eq!(report.envelopes.len(), n);
            Ok(())
        })?;
    }

    /// Invariant 10: cancelling a token twice is no different from
    /// cancelling it once; both invocations end with the same terminal
    /// error kind.
    #[test]
    fn cancelling_twice_is_idempotent(n in 5usize..30) {
        rt().block_on(async {
            let options_once: DispatchOptions<u64, String> = DispatchOptions::builder().max_concurrency(4).build();
            let cancel_once = CancellationToken::new();
            cancel_once.cancel();
            let report_once = map_parallel(
                items(n),
                |x, _scope| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(x)
                },
                options_once,
                cancel_once,
            )
            .await;

            let options_twice: DispatchOptions<u64, String> = DispatchOptions::builder().max_concurrency(4).build();
            let cancel_twice = CancellationToken::new();
            cancel_twice.cancel();
            cancel_twice.cancel();
            let report_twice = map_parallel(
                items(n),
                |x, _scope| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(x)
                },
                options_twice,
                cancel_twice,
            )
            .await;

            prop_assert_eq!(
                report_once.terminal_error.map(|e| e.is_cancellation()),
                report_twice.terminal_error.map(|e| e.is_cancellation()),
            );
            Ok(())
        })?;
    }
}
