//! Periodic sampler task shared by the progress and metrics trackers.
//!
//! Modeled as a dedicated tokio task owned by the tracker (spec section 9,
//! "fire-and-forget background sampler tasks" design note): it sleeps for
//! `interval`, takes a [`Snapshot`](crate::telemetry::Snapshot), and invokes
//! the caller's callback. On shutdown the task is cancelled and the engine
//! takes one final synchronous snapshot after all workers have stopped,
//! which is the hard requirement from spec section 4.2 — this module only
//! provides the *periodic* half; the final sample is always taken by the
//! caller directly from [`Counters::snapshot`](crate::telemetry::Counters::snapshot).

use crate::telemetry::Counters;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A handle to a spawned sampler task. Dropping this without calling
/// [`SamplerHandle::shutdown`] leaks the task until the invocation's runtime
/// shuts down; callers should always call `shutdown`.
pub struct SamplerHandle {
    stop: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SamplerHandle {
    /// Signals the sampler to stop and waits up to `timeout` for it to exit.
    /// If it overruns, disposal proceeds regardless (spec section 5,
    /// "Disposal discipline").
    pub async fn shutdown(self, timeout: Duration) {
        self.stop.notify_waiters();
        let _ = tokio::time::timeout(timeout, self.join).await;
    }
}

/// Spawns a task that invokes `on_sample` every `interval` with a snapshot
/// of `counters`, until the returned [`SamplerHandle`] is shut down.
/// Callback errors/panics are swallowed; the sampler never fails the
/// invocation.
pub fn spawn<F>(
    counters: Counters,
    started_at: Instant,
    total: Option<u64>,
    interval: Duration,
    on_sample: F,
) -> SamplerHandle
where
    F: Fn(crate::telemetry::Snapshot) -> BoxFuture<'static, ()> + Send + Sync + 'static,
{
    let stop = Arc::new(Notify::new());
    let stop_for_task = Arc::clone(&stop);

    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let snapshot = counters.snapshot(started_at, total);
                    let result = std::panic::AssertUnwindSafe(on_sample(snapshot))
                        .catch_unwind()
                        .await;
                    if result.is_err() {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("sampler callback panicked");
                        #[cfg(feature = "metrics")]
                        metrics::counter!("dispatch_callback_failures_total", "callback" => "onProgress/onMetricsSample").increment(1);
                    }
                }
                _ = stop_for_task.notified() => break,
            }
        }
    });

    SamplerHandle { stop, join }
}

trait CatchUnwindFuture: Future + Sized {
    fn catch_unwind(self) -> CatchUnwind<Self> {
        CatchUnwind { inner: self }
    }
}

impl<F: Future> CatchUnwindFuture for F {}

struct CatchUnwind<F> {
    inner: F,
}

impl<F: Future> Future for CatchUnwind<F> {
    type Output = Result<F::Output, ()>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        // SAFETY: `inner` is never moved out of; this is a standard
        // pin-projection for a single-field wrapper struct.
        let inner = unsafe { self.map_unchecked_mut(|s| &mut s.inner) };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| inner.poll(cx)));
        match result {
            Ok(std::task::Poll::Ready(v)) => std::task::Poll::Ready(Ok(v)),
            Ok(std::task::Poll::Pending) => std::task::Poll::Pending,
            Err(_) => std::task::Poll::Ready(Err(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn sampler_invokes_callback_periodically() {
        let counters = Counters::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let handle = spawn(
            counters,
            Instant::now(),
            None,
            Duration::from_millis(10),
            move |_snapshot| {
                let calls = Arc::clone(&calls_clone);
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
            },
        );

        tokio::time::sleep(Duration::from_millis(55)).await;
        handle.shutdown(Duration::from_secs(1)).await;

        assert!(calls.load(Ordering::SeqCst) >= 2);
    }
}
