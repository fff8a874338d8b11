//! Telemetry: the process-wide counter surface plus per-invocation trackers.
//!
//! Two things live here, matching spec section 4.2:
//!
//! - [`GlobalCounters`]: a lazily-initialized, teardown-free, process-wide
//!   singleton exposing the stable counter names from the public contract
//!   (`items-started`, `items-completed`, `total-retries`, `total-failures`,
//!   `throttle-events`, `drain-events`). Every invocation's [`Counters`] also
//!   feeds these on increment.
//! - [`Counters`]: the per-invocation atomic counter block
//!   (`itemsStarted`, `itemsCompleted`, `itemsFailed`, `retryCount`,
//!   `throttleCount`, `drainCount`, `activeWorkers`, `queueDepth`) plus a
//!   [`Counters::snapshot`] method used by the periodic sampler and by the
//!   mandatory final sample after worker termination.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Process-wide monotonic counters, exposed under the stable names in
/// spec section 6. There is exactly one of these per process; it is created
/// lazily on first use and is never torn down.
#[derive(Default)]
pub struct GlobalCounters {
    pub items_started: AtomicU64,
    pub items_completed: AtomicU64,
    pub total_retries: AtomicU64,
    pub total_failures: AtomicU64,
    pub throttle_events: AtomicU64,
    pub drain_events: AtomicU64,
}

static GLOBAL: OnceLock<GlobalCounters> = OnceLock::new();

impl GlobalCounters {
    /// Returns the process-wide singleton, initializing it on first call.
    pub fn global() -> &'static GlobalCounters {
        GLOBAL.get_or_init(GlobalCounters::default)
    }
}

/// Per-invocation atomic counters. Cheap to clone (wraps an `Arc`) so the
/// input pump, every worker, and the result sink can all hold a handle
/// without locking.
#[derive(Clone)]
pub struct Counters {
    inner: std::sync::Arc<CountersInner>,
}

#[derive(Default)]
struct CountersInner {
    items_started: AtomicU64,
    items_completed: AtomicU64,
    items_failed: AtomicU64,
    retry_count: AtomicU64,
    throttle_count: AtomicU64,
    drain_count: AtomicU64,
    active_workers: AtomicI64,
    queue_depth: AtomicI64,
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

impl Counters {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(CountersInner::default()),
        }
    }

    pub fn item_started(&self) {
        self.inner.items_started.fetch_add(1, Ordering::SeqCst);
        GlobalCounters::global()
            .items_started
            .fetch_add(1, Ordering::SeqCst);
    }

    pub fn item_completed(&self) {
        self.inner.items_completed.fetch_add(1, Ordering::SeqCst);
        GlobalCounters::global()
            .items_completed
            .fetch_add(1, Ordering::SeqCst);
    }

    pub fn item_failed(&self) {
        self.inner.items_failed.fetch_add(1, Ordering::SeqCst);
        GlobalCounters::global()
            .total_failures
            .fetch_add(1, Ordering::SeqCst);
    }

    pub fn retried(&self) {
        self.inner.retry_count.fetch_add(1, Ordering::SeqCst);
        GlobalCounters::global()
            .total_retries
            .fetch_add(1, Ordering::SeqCst);
    }

    pub fn throttled(&self) {
        self.inner.throttle_count.fetch_add(1, Ordering::SeqCst);
        GlobalCounters::global()
            .throttle_events
            .fetch_add(1, Ordering::SeqCst);
    }

    pub fn drained(&self) {
        self.inner.drain_count.fetch_add(1, Ordering::SeqCst);
        GlobalCounters::global()
            .drain_events
            .fetch_add(1, Ordering::SeqCst);
    }

    pub fn worker_started(&self) {
        self.inner.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    pub fn worker_stopped(&self) {
        self.inner.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.inner.queue_depth.store(depth, Ordering::SeqCst);
    }

    pub fn items_started_count(&self) -> u64 {
        self.inner.items_started.load(Ordering::SeqCst)
    }

    pub fn items_completed_count(&self) -> u64 {
        self.inner.items_completed.load(Ordering::SeqCst)
    }

    pub fn items_failed_count(&self) -> u64 {
        self.inner.items_failed.load(Ordering::SeqCst)
    }

    /// Takes a consistent snapshot of every counter. Callers that need the
    /// "final sample" guarantee of spec section 4.2 should call this after a
    /// `SeqCst` fence, which every increment above already establishes.
    pub fn snapshot(&self, started_at: Instant, total: Option<u64>) -> Snapshot {
        let items_started = self.inner.items_started.load(Ordering::SeqCst);
        let items_completed = self.inner.items_completed.load(Ordering::SeqCst);
        let items_failed = self.inner.items_failed.load(Ordering::SeqCst);
        let retry_count = self.inner.retry_count.load(Ordering::SeqCst);
        let throttle_count = self.inner.throttle_count.load(Ordering::SeqCst);
        let drain_count = self.inner.drain_count.load(Ordering::SeqCst);
        let active_workers = self.inner.active_workers.load(Ordering::SeqCst).max(0) as u64;
        let queue_depth = self.inner.queue_depth.load(Ordering::SeqCst).max(0) as u64;

        let elapsed = started_at.elapsed();
        let finished = items_completed + items_failed;
        let error_ratio = if finished > 0 {
            items_failed as f64 / finished as f64
        } else {
            0.0
        };
        let throughput_per_sec = if elapsed.as_secs_f64() > 0.0 {
            finished as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let (percent_complete, eta) = match total {
            Some(total) if total > 0 => {
                let percent = (finished as f64 / total as f64).min(1.0);
                let eta = if throughput_per_sec > 0.0 {
                    let remaining = total.saturating_sub(finished) as f64;
                    Some(Duration::from_secs_f64(remaining / throughput_per_sec))
                } else {
                    None
                };
                (Some(percent), eta)
            }
            _ => (None, None),
        };

        Snapshot {
            elapsed,
            items_started,
            items_completed,
            items_failed,
            retry_count,
            throttle_count,
            drain_count,
            active_workers,
            queue_depth,
            error_ratio,
            throughput_per_sec,
            percent_complete,
            eta,
        }
    }
}

/// A point-in-time view of an invocation's progress and metrics, sufficient
/// to back both `onProgress` and `onMetricsSample` callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub elapsed: Duration,
    pub items_started: u64,
    pub items_completed: u64,
    pub items_failed: u64,
    pub retry_count: u64,
    pub throttle_count: u64,
    pub drain_count: u64,
    pub active_workers: u64,
    pub queue_depth: u64,
    pub error_ratio: f64,
    pub throughput_per_sec: f64,
    /// `None` when the source's total length is not known in advance
    /// (unbounded/streaming sources).
    pub percent_complete: Option<f64>,
    pub eta: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let counters = Counters::new();
        counters.item_started();
        counters.item_started();
        counters.item_completed();
        counters.item_failed();
        counters.retried();

        let snap = counters.snapshot(Instant::now(), Some(2));
        assert_eq!(snap.items_started, 2);
        assert_eq!(snap.items_completed, 1);
        assert_eq!(snap.items_failed, 1);
        assert_eq!(snap.retry_count, 1);
        assert_eq!(snap.error_ratio, 0.5);
        assert_eq!(snap.percent_complete, Some(1.0));
    }

    #[test]
    fn snapshot_without_total_has_no_percent_or_eta() {
        let counters = Counters::new();
        counters.item_started();
        counters.item_completed();
        let snap = counters.snapshot(Instant::now(), None);
        assert_eq!(snap.percent_complete, None);
        assert_eq!(snap.eta, None);
    }

    #[test]
    fn global_counters_accumulate_across_invocations() {
        let before = GlobalCounters::global()
            .items_started
            .load(Ordering::SeqCst);
        let counters = Counters::new();
        counters.item_started();
        let after = GlobalCounters::global()
            .items_started
            .load(Ordering::SeqCst);
        assert_eq!(after, before + 1);
    }
}
