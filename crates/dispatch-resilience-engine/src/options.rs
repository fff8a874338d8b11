//! `DispatchOptions` and friends (spec section 3): the immutable
//! configuration record passed to every dispatch invocation.

use dispatch_resilience_adaptive::AdaptiveConcurrencyConfig;
use dispatch_resilience_circuitbreaker::CircuitBreaker;
use dispatch_resilience_core::telemetry::Snapshot;
use dispatch_resilience_ratelimiter::RateLimiter;
use dispatch_resilience_retry::BackoffStrategy;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// The three error-mode policies (spec section 4.1 and the glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// The first unhandled failure cancels the whole invocation.
    FailFast,
    /// Failures are recorded alongside successes; processing continues.
    CollectAndContinue,
    /// Failed items are silently dropped from the output; no error is
    /// surfaced for them.
    BestEffort,
}

impl Default for ErrorMode {
    fn default() -> Self {
        ErrorMode::FailFast
    }
}

/// Observability option shared shape for both progress and metrics
/// tracking (spec section 3, `ProgressOptions` / `MetricsOptions`).
pub struct SamplingOptions {
    pub(crate) interval: Duration,
    pub(crate) on_sample: Arc<dyn Fn(Snapshot) -> BoxFuture<'static, ()> + Send + Sync>,
}

impl SamplingOptions {
    /// Creates a new sampling option: invoke `on_sample` every `interval`.
    pub fn new<F, Fut>(interval: Duration, on_sample: F) -> Self
    where
        F: Fn(Snapshot) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            interval,
            on_sample: Arc::new(move |snapshot| Box::pin(on_sample(snapshot))),
        }
    }
}

/// `ProgressOptions` from spec section 3.
pub type ProgressOptions = SamplingOptions;
/// `MetricsOptions` from spec section 3.
pub type MetricsOptions = SamplingOptions;

type StartHook = Arc<dyn Fn(u64) -> BoxFuture<'static, ()> + Send + Sync>;
type CompleteHook = Arc<dyn Fn(u64) -> BoxFuture<'static, ()> + Send + Sync>;
type RetryHook<E> = Arc<dyn Fn(u64, u32, E) -> BoxFuture<'static, ()> + Send + Sync>;
type ErrorHook<E> = Arc<dyn Fn(u64, E) -> BoxFuture<'static, bool> + Send + Sync>;
type ThrottleHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;
type DrainHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;
type FallbackHook<R, E> = Arc<dyn Fn(u64, E) -> BoxFuture<'static, R> + Send + Sync>;
type TransientPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Immutable, per-invocation dispatch configuration (spec section 3).
/// Built via [`DispatchOptions::builder`]; cheap to clone since every
/// field is either `Copy` or held behind an `Arc`.
#[derive(Clone)]
pub struct DispatchOptions<R, E> {
    pub(crate) max_concurrency: usize,
    pub(crate) per_item_timeout: Option<Duration>,
    pub(crate) error_mode: ErrorMode,
    pub(crate) is_transient: Option<TransientPredicate<E>>,
    pub(crate) max_retries: u32,
    pub(crate) base_delay: Duration,
    pub(crate) backoff_strategy: BackoffStrategy,
    pub(crate) max_delay: Option<Duration>,
    pub(crate) input_queue_capacity: usize,
    pub(crate) ordered_output: bool,
    pub(crate) throttled_is_transient: bool,
    pub(crate) progress: Option<Arc<ProgressOptions>>,
    pub(crate) metrics: Option<Arc<MetricsOptions>>,
    pub(crate) rate_limit: Option<RateLimiter>,
    pub(crate) circuit_breaker: Option<CircuitBreaker>,
    pub(crate) adaptive_concurrency: Option<Arc<AdaptiveConcurrencyConfig>>,
    pub(crate) on_start_item: Option<StartHook>,
    pub(crate) on_complete_item: Option<CompleteHook>,
    pub(crate) on_retry: Option<RetryHook<E>>,
    pub(crate) on_error: Option<ErrorHook<E>>,
    pub(crate) on_throttle: Option<ThrottleHook>,
    pub(crate) on_drain: Option<DrainHook>,
    pub(crate) on_fallback: Option<FallbackHook<R, E>>,
}

impl<R, E> DispatchOptions<R, E> {
    /// Creates a new builder with spec-documented defaults.
    pub fn builder() -> DispatchOptionsBuilder<R, E> {
        DispatchOptionsBuilder::new()
    }

    /// The effective concurrency cap before adaptive concurrency is
    /// consulted: `min(max_concurrency, adaptive.max)` when adaptive
    /// concurrency is configured, else `max_concurrency`.
    pub(crate) fn static_concurrency_ceiling(&self) -> usize {
        match &self.adaptive_concurrency {
            Some(adaptive) => self.max_concurrency.min(adaptive.max),
            None => self.max_concurrency,
        }
    }

    /// Whether `error` should be retried, per `is_transient`. Defaults to
    /// `false` (spec section 3: "default: false").
    pub(crate) fn is_transient(&self, error: &E) -> bool {
        match &self.is_transient {
            Some(predicate) => predicate(error),
            None => false,
        }
    }
}

/// Builder for [`DispatchOptions`].
pub struct DispatchOptionsBuilder<R, E> {
    max_concurrency: usize,
    per_item_timeout: Option<Duration>,
    error_mode: ErrorMode,
    is_transient: Option<TransientPredicate<E>>,
    max_retries: u32,
    base_delay: Duration,
    backoff_strategy: BackoffStrategy,
    max_delay: Option<Duration>,
    input_queue_capacity: Option<usize>,
    ordered_output: bool,
    throttled_is_transient: bool,
    progress: Option<Arc<ProgressOptions>>,
    metrics: Option<Arc<MetricsOptions>>,
    rate_limit: Option<RateLimiter>,
    circuit_breaker: Option<CircuitBreaker>,
    adaptive_concurrency: Option<Arc<AdaptiveConcurrencyConfig>>,
    on_start_item: Option<StartHook>,
    on_complete_item: Option<CompleteHook>,
    on_retry: Option<RetryHook<E>>,
    on_error: Option<ErrorHook<E>>,
    on_throttle: Option<ThrottleHook>,
    on_drain: Option<DrainHook>,
    on_fallback: Option<FallbackHook<R, E>>,
}

impl<R, E> Default for DispatchOptionsBuilder<R, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Default `maxConcurrency` when the caller passes `0` (spec section 3:
/// "0 or negative -> implementation-defined default, typically processor
/// count").
fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl<R, E> DispatchOptionsBuilder<R, E> {
    /// Creates a new builder. Defaults: `maxConcurrency` = processor count,
    /// no per-item timeout, `FailFast` error mode, no retries, 100ms base
    /// delay, exponential backoff, `inputQueueCapacity` = `maxConcurrency * 2`,
    /// unordered output.
    pub fn new() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            per_item_timeout: None,
            error_mode: ErrorMode::FailFast,
            is_transient: None,
            max_retries: 0,
            base_delay: Duration::from_millis(100),
            backoff_strategy: BackoffStrategy::Exponential,
            max_delay: None,
            input_queue_capacity: None,
            ordered_output: false,
            throttled_is_transient: false,
            progress: None,
            metrics: None,
            rate_limit: None,
            circuit_breaker: None,
            adaptive_concurrency: None,
            on_start_item: None,
            on_complete_item: None,
            on_retry: None,
            on_error: None,
            on_throttle: None,
            on_drain: None,
            on_fallback: None,
        }
    }

    /// Sets the worker pool size. `0` falls back to the processor count.
    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = if n == 0 { default_max_concurrency() } else { n };
        self
    }

    /// Bounds each individual attempt's runtime; exceeding it is a
    /// [`dispatch_resilience_core::DispatchError::Timeout`], transient by
    /// default.
    pub fn per_item_timeout(mut self, timeout: Duration) -> Self {
        self.per_item_timeout = Some(timeout);
        self
    }

    /// Sets the error-mode policy.
    pub fn error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    /// Sets the predicate deciding which user errors are retry-eligible.
    /// Default: no error is retried.
    pub fn is_transient<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.is_transient = Some(Arc::new(predicate));
        self
    }

    /// Sets the maximum number of retries per item (not counting the
    /// initial attempt).
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Sets the base delay the backoff strategy scales from.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the backoff growth strategy.
    pub fn backoff_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Caps the computed retry delay. Default: 30 seconds (spec section 4.6).
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Sets the bounded input queue's capacity. Default:
    /// `max_concurrency * 2`.
    pub fn input_queue_capacity(mut self, capacity: usize) -> Self {
        self.input_queue_capacity = Some(capacity);
        self
    }

    /// Enables index-ordered output: for any `i < j`, result `i` is
    /// emitted before result `j`.
    pub fn ordered_output(mut self, ordered: bool) -> Self {
        self.ordered_output = ordered;
        self
    }

    /// Whether a rate-limiter wait that exceeds `maxWaitPerAcquire` should
    /// be retried like any other transient error. Default: `false` (spec
    /// section 9, Open Questions: exposed as a configurable policy).
    pub fn throttled_is_transient(mut self, transient: bool) -> Self {
        self.throttled_is_transient = transient;
        self
    }

    /// Attaches a progress tracker.
    pub fn progress(mut self, options: ProgressOptions) -> Self {
        self.progress = Some(Arc::new(options));
        self
    }

    /// Attaches a metrics tracker.
    pub fn metrics(mut self, options: MetricsOptions) -> Self {
        self.metrics = Some(Arc::new(options));
        self
    }

    /// Attaches a (possibly shared) rate limiter. The engine never mutates
    /// its construction parameters (spec section 3, lifecycles).
    pub fn rate_limit(mut self, limiter: RateLimiter) -> Self {
        self.rate_limit = Some(limiter);
        self
    }

    /// Attaches a (possibly shared) circuit breaker.
    pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    /// Enables adaptive concurrency; the engine owns the controller for
    /// the lifetime of this invocation.
    pub fn adaptive_concurrency(mut self, config: AdaptiveConcurrencyConfig) -> Self {
        self.adaptive_concurrency = Some(Arc::new(config));
        self
    }

    /// Registers `onStartItem`, fired once before an item's first attempt.
    pub fn on_start_item<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(u64) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.on_start_item = Some(Arc::new(move |index| Box::pin(f(index))));
        self
    }

    /// Registers `onCompleteItem`, fired exactly once per item regardless
    /// of terminal state.
    pub fn on_complete_item<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(u64) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.on_complete_item = Some(Arc::new(move |index| Box::pin(f(index))));
        self
    }

    /// Registers `onRetry`, fired before each retry's backoff sleep.
    pub fn on_retry<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(u64, u32, E) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.on_retry = Some(Arc::new(move |index, attempt, error| {
            Box::pin(f(index, attempt, error))
        }));
        self
    }

    /// Registers `onError`, fired for an unhandled failure before
    /// error-mode arbitration. Returning `true` marks the error as handled
    /// (it will not be surfaced by the invocation).
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(u64, E) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |index, error| Box::pin(f(index, error))));
        self
    }

    /// Registers `onThrottle`, fired (coalesced) whenever the rate limiter
    /// makes a caller wait.
    pub fn on_throttle<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.on_throttle = Some(Arc::new(move || Box::pin(f())));
        self
    }

    /// Registers `onDrain`, fired exactly once when the invocation's
    /// source is exhausted (including immediately, for an empty source).
    pub fn on_drain<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.on_drain = Some(Arc::new(move || Box::pin(f())));
        self
    }

    /// Registers `onFallback`, computing a substitute success value for an
    /// otherwise-unrecoverable failure. Suppresses error-mode surfacing for
    /// that item, but `onError` still observes the original error (spec
    /// section 9, Open Questions).
    pub fn on_fallback<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(u64, E) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
    {
        self.on_fallback = Some(Arc::new(move |index, error| Box::pin(f(index, error))));
        self
    }

    /// Builds the immutable options record.
    pub fn build(self) -> DispatchOptions<R, E> {
        let input_queue_capacity = self
            .input_queue_capacity
            .unwrap_or(self.max_concurrency * 2)
            .max(1);

        DispatchOptions {
            max_concurrency: self.max_concurrency,
            per_item_timeout: self.per_item_timeout,
            error_mode: self.error_mode,
            is_transient: self.is_transient,
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            backoff_strategy: self.backoff_strategy,
            max_delay: self.max_delay,
            input_queue_capacity,
            ordered_output: self.ordered_output,
            throttled_is_transient: self.throttled_is_transient,
            progress: self.progress,
            metrics: self.metrics,
            rate_limit: self.rate_limit,
            circuit_breaker: self.circuit_breaker,
            adaptive_concurrency: self.adaptive_concurrency,
            on_start_item: self.on_start_item,
            on_complete_item: self.on_complete_item,
            on_retry: self.on_retry,
            on_error: self.on_error,
            on_throttle: self.on_throttle,
            on_drain: self.on_drain,
            on_fallback: self.on_fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_input_queue_capacity_is_double_concurrency() {
        let options: DispatchOptions<(), ()> = DispatchOptions::builder()
            .max_concurrency(4)
            .build();
        assert_eq!(options.input_queue_capacity, 8);
    }

    #[test]
    fn zero_concurrency_falls_back_to_processor_count() {
        let options: DispatchOptions<(), ()> = DispatchOptions::builder()
            .max_concurrency(0)
            .build();
        assert!(options.max_concurrency >= 1);
    }

    #[test]
    fn default_is_transient_is_always_false() {
        let options: DispatchOptions<(), String> = DispatchOptions::builder().build();
        assert!(!options.is_transient(&"boom".to_string()));
    }
}
