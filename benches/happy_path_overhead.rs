use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dispatch_resilience::{map_parallel, DispatchOptions};
use dispatch_resilience_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig};
use dispatch_resilience_ratelimiter::{RateLimiter, RateLimiterConfig};
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct TestError;

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "test error")
    }
}

impl std::error::Error for TestError {}

fn hundred_items() -> dispatch_resilience::InputStream<u64> {
    stream::iter(0u64..100).boxed()
}

fn bench_bare_dispatch(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("dispatch_no_resilience_layers", |b| {
        b.to_async(&runtime).iter(|| async {
            let options: DispatchOptions<u64, TestError> = DispatchOptions::builder().max_concurrency(8).build();
            let report = map_parallel(hundred_items(), |x, _scope| async move { Ok(x) }, options, CancellationToken::new()).await;
            black_box(report.terminal_error)
        });
    });
}

fn bench_ordered_output(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("dispatch_ordered_output", |b| {
        b.to_async(&runtime).iter(|| async {
            let options: DispatchOptions<u64, TestError> = DispatchOptions::builder().max_concurrency(8).ordered_output(true).build();
            let report = map_parallel(hundred_items(), |x, _scope| async move { Ok(x) }, options, CancellationToken::new()).await;
            black_box(report.terminal_error)
        });
    });
}

fn bench_with_retries_configured_but_unused(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("dispatch_retry_configured_no_failures", |b| {
        b.to_async(&runtime).iter(|| async {
            let options: DispatchOptions<u64, TestError> = DispatchOptions::builder()
                .max_concurrency(8)
                .max_retries(3)
                .base_delay(Duration::from_millis(10))
                .is_transient(|_: &TestError| true)
                .build();
            let report = map_parallel(hundred_items(), |x, _scope| async move { Ok(x) }, options, CancellationToken::new()).await;
            black_box(report.terminal_error)
        });
    });
}

fn bench_with_rate_limiter_under_burst(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("dispatch_rate_limited_within_burst", |b| {
        b.to_async(&runtime).iter(|| async {
            let limiter = RateLimiter::new(RateLimiterConfig::builder().tokens_per_second(10_000.0).burst_capacity(100).build());
            let options: DispatchOptions<u64, TestError> = DispatchOptions::builder().max_concurrency(8).rate_limit(limiter).build();
            let report = map_parallel(hundred_items(), |x, _scope| async move { Ok(x) }, options, CancellationToken::new()).await;
            black_box(report.terminal_error)
        });
    });
}

fn bench_with_circuit_breaker_closed(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("dispatch_circuit_breaker_closed", |b| {
        b.to_async(&runtime).iter(|| async {
            let breaker = CircuitBreaker::new(CircuitBreakerConfig::builder().failure_threshold(50).sampling_duration(Duration::from_secs(30)).build());
            let options: DispatchOptions<u64, TestError> = DispatchOptions::builder().max_concurrency(8).circuit_breaker(breaker).build();
            let report = map_parallel(hundred_items(), |x, _scope| async move { Ok(x) }, options, CancellationToken::new()).await;
            black_box(report.terminal_error)
        });
    });
}

fn bench_fully_composed(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("dispatch_all_resilience_layers_enabled", |b| {
        b.to_async(&runtime).iter(|| async {
            let limiter = RateLimiter::new(RateLimiterConfig::builder().tokens_per_second(10_000.0).burst_capacity(100).build());
            let breaker = CircuitBreaker::new(CircuitBreakerConfig::builder().failure_threshold(50).sampling_duration(Duration::from_secs(30)).build());
            let options: DispatchOptions<u64, TestError> = DispatchOptions::builder()
                .max_concurrency(8)
                .ordered_output(true)
                .max_retries(3)
                .base_delay(Duration::from_millis(10))
                .is_transient(|_: &TestError| true)
                .rate_limit(limiter)
                .circuit_breaker(breaker)
                .build();
            let report = map_parallel(hundred_items(), |x, _scope| async move { Ok(x) }, options, CancellationToken::new()).await;
            black_box(report.terminal_error)
        });
    });
}

criterion_group!(
    benches,
    bench_bare_dispatch,
    bench_ordered_output,
    bench_with_retries_configured_but_unused,
    bench_with_rate_limiter_under_burst,
    bench_with_circuit_breaker_closed,
    bench_fully_composed
);
criterion_main!(benches);
