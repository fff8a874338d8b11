//! The adaptive concurrency controller itself (spec section 4.5).

use crate::config::{AdaptiveConcurrencyConfig, DecreaseStrategy, IncreaseStrategy};
use crate::events::AdaptiveConcurrencyEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[cfg(feature = "metrics")]
use metrics::gauge;

#[derive(Default)]
struct Window {
    latencies_ms: Vec<f64>,
    successes: usize,
    failures: usize,
}

impl Window {
    fn clear(&mut self) {
        self.latencies_ms.clear();
        self.successes = 0;
        self.failures = 0;
    }

    fn total(&self) -> usize {
        self.successes + self.failures
    }

    fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            1.0
        } else {
            self.successes as f64 / self.total() as f64
        }
    }

    /// Nearest-rank p95 over the latencies observed this window.
    fn p95_latency_ms(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        let mut sorted = self.latencies_ms.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
        let index = rank.saturating_sub(1).min(sorted.len() - 1);
        sorted[index]
    }
}

struct Inner {
    config: AdaptiveConcurrencyConfig,
    limit: AtomicUsize,
    window: Mutex<Window>,
}

/// Periodically samples recent latency/success-rate and adjusts an
/// effective concurrency limit (spec section 4.5). Cheap to clone; every
/// clone shares the same limit and window.
#[derive(Clone)]
pub struct AdaptiveConcurrencyController {
    inner: Arc<Inner>,
}

/// Handle to the background sampler task. Dropping without calling
/// [`AdaptiveConcurrencyHandle::shutdown`] leaks the task.
pub struct AdaptiveConcurrencyHandle {
    stop: Arc<Notify>,
    join: JoinHandle<()>,
}

impl AdaptiveConcurrencyHandle {
    /// Signals the sampler to stop and waits up to `timeout` for it to exit.
    pub async fn shutdown(self, timeout: Duration) {
        self.stop.notify_waiters();
        let _ = tokio::time::timeout(timeout, self.join).await;
    }
}

impl AdaptiveConcurrencyController {
    /// Builds a controller and spawns its background sampler task. Returns
    /// the controller (for `record_outcome`/`current_limit`) and a handle
    /// used to stop the sampler on invocation shutdown.
    pub fn spawn(config: AdaptiveConcurrencyConfig) -> (Self, AdaptiveConcurrencyHandle) {
        let initial = config.initial;
        let inner = Arc::new(Inner {
            config,
            limit: AtomicUsize::new(initial),
            window: Mutex::new(Window::default()),
        });
        let controller = Self { inner };

        let stop = Arc::new(Notify::new());
        let stop_for_task = Arc::clone(&stop);
        let controller_for_task = controller.clone();

        let join = tokio::spawn(async move {
            let interval = controller_for_task.inner.config.sample_interval;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        controller_for_task.sample_and_adjust();
                    }
                    _ = stop_for_task.notified() => break,
                }
            }
        });

        (controller, AdaptiveConcurrencyHandle { stop, join })
    }

    /// Records the outcome of one completed `op` invocation, for the next
    /// sampling pass to consider.
    pub fn record_outcome(&self, success: bool, latency: Duration) {
        let mut window = self.inner.window.lock().unwrap();
        if success {
            window.successes += 1;
        } else {
            window.failures += 1;
        }
        window.latencies_ms.push(latency.as_secs_f64() * 1000.0);
    }

    /// The current effective limit.
    pub fn current_limit(&self) -> usize {
        self.inner.limit.load(Ordering::SeqCst)
    }

    /// Runs one sampling pass immediately, outside the periodic schedule.
    /// Exposed for tests that don't want to wait on real time.
    pub fn sample_and_adjust(&self) {
        let config = &self.inner.config;
        let (p95_latency_ms, success_rate, observations) = {
            let mut window = self.inner.window.lock().unwrap();
            let total = window.total();
            if total == 0 {
                return;
            }
            let result = (window.p95_latency_ms(), window.success_rate(), total);
            window.clear();
            result
        };

        config
            .event_listeners
            .emit(&AdaptiveConcurrencyEvent::Sampled {
                pattern_name: config.name.clone(),
                timestamp: Instant::now(),
                p95_latency_ms,
                success_rate,
                observations,
            });

        let current = self.inner.limit.load(Ordering::SeqCst);
        let target_latency_ms = config.target_latency.as_secs_f64() * 1000.0;

        let degraded = success_rate < config.min_success_rate || p95_latency_ms > 2.0 * target_latency_ms;
        let healthy = success_rate >= config.min_success_rate && p95_latency_ms <= target_latency_ms;

        let new_limit = if degraded {
            match config.decrease_strategy {
                DecreaseStrategy::Additive(n) => current.saturating_sub(n),
                DecreaseStrategy::Halving => current / 2,
            }
            .max(config.min)
        } else if healthy {
            match config.increase_strategy {
                IncreaseStrategy::Additive(n) => current.saturating_add(n),
                IncreaseStrategy::Multiplicative(factor) => {
                    ((current as f64) * factor).ceil() as usize
                }
            }
            .min(config.max)
        } else {
            current
        };

        if new_limit != current {
            self.inner.limit.store(new_limit, Ordering::SeqCst);

            config
                .event_listeners
                .emit(&AdaptiveConcurrencyEvent::LimitChanged {
                    pattern_name: config.name.clone(),
                    timestamp: Instant::now(),
                    old_limit: current,
                    new_limit,
                });

            #[cfg(feature = "tracing")]
            tracing::debug!(
                controller = %config.name,
                old_limit = current,
                new_limit,
                p95_latency_ms,
                success_rate,
                "adaptive concurrency limit changed"
            );

            #[cfg(feature = "metrics")]
            gauge!("adaptive_concurrency_limit", "controller" => config.name.clone())
                .set(new_limit as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(config: AdaptiveConcurrencyConfig) -> AdaptiveConcurrencyController {
        let initial = config.initial;
        AdaptiveConcurrencyController {
            inner: Arc::new(Inner {
                config,
                limit: AtomicUsize::new(initial),
                window: Mutex::new(Window::default()),
            }),
        }
    }

    #[test]
    fn increases_when_healthy() {
        let config = AdaptiveConcurrencyConfig::builder()
            .initial(10)
            .min(1)
            .max(100)
            .target_latency(Duration::from_millis(100))
            .min_success_rate(0.9)
            .increase_strategy(IncreaseStrategy::Additive(1))
            .build();
        let ctl = controller(config);
        for _ in 0..20 {
            ctl.record_outcome(true, Duration::from_millis(10));
        }
        ctl.sample_and_adjust();
        assert_eq!(ctl.current_limit(), 11);
    }

    #[test]
    fn halves_on_low_success_rate() {
        let config = AdaptiveConcurrencyConfig::builder()
            .initial(20)
            .min(1)
            .max(100)
            .min_success_rate(0.9)
            .decrease_strategy(DecreaseStrategy::Halving)
            .build();
        let ctl = controller(config);
        for _ in 0..10 {
            ctl.record_outcome(false, Duration::from_millis(10));
        }
        ctl.sample_and_adjust();
        assert_eq!(ctl.current_limit(), 10);
    }

    #[test]
    fn decreases_additively_on_high_latency() {
        let config = AdaptiveConcurrencyConfig::builder()
            .initial(10)
            .min(1)
            .max(100)
            .target_latency(Duration::from_millis(50))
            .decrease_strategy(DecreaseStrategy::Additive(2))
            .build();
        let ctl = controller(config);
        for _ in 0..20 {
            ctl.record_outcome(true, Duration::from_millis(500));
        }
        ctl.sample_and_adjust();
        assert_eq!(ctl.current_limit(), 8);
    }

    #[test]
    fn clamps_to_max_and_min() {
        let config = AdaptiveConcurrencyConfig::builder()
            .initial(1)
            .min(1)
            .max(2)
            .increase_strategy(IncreaseStrategy::Additive(10))
            .build();
        let ctl = controller(config);
        for _ in 0..5 {
            ctl.record_outcome(true, Duration::from_millis(1));
        }
        ctl.sample_and_adjust();
        assert_eq!(ctl.current_limit(), 2);
    }

    #[test]
    fn no_observations_leaves_limit_unchanged() {
        let config = AdaptiveConcurrencyConfig::builder().initial(10).build();
        let ctl = controller(config);
        ctl.sample_and_adjust();
        assert_eq!(ctl.current_limit(), 10);
    }

    #[tokio::test]
    async fn spawned_controller_adjusts_on_schedule() {
        let config = AdaptiveConcurrencyConfig::builder()
            .initial(5)
            .min(1)
            .max(50)
            .sample_interval(Duration::from_millis(15))
            .increase_strategy(IncreaseStrategy::Additive(1))
            .build();
        let (ctl, handle) = AdaptiveConcurrencyController::spawn(config);
        for _ in 0..5 {
            ctl.record_outcome(true, Duration::from_millis(1));
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        handle.shutdown(Duration::from_secs(1)).await;
        assert!(ctl.current_limit() > 5);
    }
}
