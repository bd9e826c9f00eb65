use admission_guard::rate_limit::{
    AdmissionStrategy, IdentitySignals, MemoryCounterStore, RateLimitPolicy, RateLimiter,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;

fn benchmark_identity_resolution(c: &mut Criterion) {
    let forwarded = IdentitySignals {
        forwarded_for: Some("203.0.113.7, 10.0.0.1, 10.0.0.2"),
        remote_addr: "10.0.0.3:51234",
        token: None,
    };
    let remote = IdentitySignals {
        forwarded_for: None,
        remote_addr: "[2001:db8::1]:51234",
        token: None,
    };
    let token = IdentitySignals {
        forwarded_for: Some("203.0.113.7"),
        remote_addr: "10.0.0.3:51234",
        token: Some("abc123"),
    };

    c.bench_function("identity_forwarded_for", |b| {
        b.iter(|| black_box(black_box(&forwarded).identity()))
    });
    c.bench_function("identity_remote_addr", |b| {
        b.iter(|| black_box(black_box(&remote).identity()))
    });
    c.bench_function("identity_token", |b| {
        b.iter(|| black_box(black_box(&token).identity()))
    });
}

fn benchmark_memory_evaluate(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let mut group = c.benchmark_group("memory_evaluate");

    for strategy in [AdmissionStrategy::ReadThenIncrement, AdmissionStrategy::Atomic] {
        // Large limits keep every iteration on the admit path
        let limiter = RateLimiter::new(
            RateLimitPolicy::new(u32::MAX, u32::MAX, Duration::from_secs(60)),
            Arc::new(MemoryCounterStore::new()),
        )
        .with_strategy(strategy);

        let signals = IdentitySignals {
            forwarded_for: Some("192.168.1.1"),
            remote_addr: "10.0.0.3:51234",
            token: None,
        };

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", strategy)),
            &limiter,
            |b, limiter| {
                b.to_async(&runtime)
                    .iter(|| async { black_box(limiter.evaluate(&signals, None).await) })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_identity_resolution,
    benchmark_memory_evaluate
);
criterion_main!(benches);
