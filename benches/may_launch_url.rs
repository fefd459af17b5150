//! Speculation benchmark suite.
//!
//! Benchmarks the hot paths of a navigation hint:
//! - Throttler bookkeeping for a single UID
//! - `mayLaunchUrl` followed by the matching launch, at different session counts
//! - Session churn through the control loop
//!
//! Run with: cargo bench --bench may_launch_url
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use customtabs_connection::engine::{MemoryPlatform, Platform};
use customtabs_connection::throttle::{MemoryThrottleStore, ThrottlerRegistry};
use customtabs_connection::{
    CustomTabsConnection, MayLaunchExtras, ManualClock, SessionToken, ThrottlePolicy, Uid,
};
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const SESSION_COUNTS: &[usize] = &[1, 10, 100];
const BENCH_UID: Uid = Uid::new(10_001);
const BENCH_PACKAGE: &str = "com.example.bench";
const BENCH_URL: &str = "https://example.com/article?id=42";

// ============================================================================
// Benchmark: Throttler
// ============================================================================

fn bench_throttler(c: &mut Criterion) {
    let mut group = c.benchmark_group("throttler");

    let clock = Arc::new(ManualClock::new(1_000_000));
    let mut registry = ThrottlerRegistry::new(
        ThrottlePolicy::default(),
        clock.clone(),
        Arc::new(MemoryThrottleStore::new()),
    );

    group.bench_function("request_then_success", |b| {
        b.iter(|| {
            clock.advance(Duration::from_secs(10));
            let throttler = registry.get_for_uid(BENCH_UID);
            let allowed = throttler.is_prerendering_allowed();
            throttler.register_prerender_request(BENCH_URL);
            throttler.register_success(BENCH_URL);
            black_box(allowed)
        });
    });

    group.finish();
}

// ============================================================================
// Benchmark: Speculation Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let mut group = c.benchmark_group("may_launch_url");
    group.measurement_time(Duration::from_secs(10));

    for &count in SESSION_COUNTS {
        let (connection, clock, sessions) = rt.block_on(setup(count));

        group.bench_with_input(
            BenchmarkId::new("hint_and_launch", count),
            &count,
            |b, _| {
                b.to_async(&rt).iter(|| {
                    clock.advance(Duration::from_secs(10));
                    let connection = connection.clone();
                    let token = sessions[0];
                    async move {
                        let accepted = connection
                            .may_launch_url(token, BENCH_UID, Some(BENCH_URL), MayLaunchExtras::new(), &[])
                            .await;
                        let handle = connection.take_speculated_url(token, BENCH_URL, None).await;
                        black_box((accepted, handle))
                    }
                });
            },
        );

        rt.block_on(connection.shutdown());
    }

    group.finish();
}

// ============================================================================
// Benchmark: Session Churn
// ============================================================================

fn bench_session_churn(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let (connection, _clock, _sessions) = rt.block_on(setup(0));

    let mut group = c.benchmark_group("sessions");

    group.bench_function("new_then_cleanup", |b| {
        b.to_async(&rt).iter(|| {
            let connection = connection.clone();
            async move {
                let token = SessionToken::next();
                let created = connection.new_session(token, BENCH_UID, None).await;
                let removed = connection.cleanup_session(token).await;
                black_box((created, removed))
            }
        });
    });

    group.finish();
    rt.block_on(connection.shutdown());
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn setup(sessions: usize) -> (CustomTabsConnection, Arc<ManualClock>, Vec<SessionToken>) {
    let engine = Arc::new(MemoryPlatform::new());
    engine.register_package(BENCH_UID, BENCH_PACKAGE);
    let clock = Arc::new(ManualClock::new(1_000_000));

    let connection = CustomTabsConnection::builder()
        .platform(Platform::in_memory(engine))
        .clock(clock.clone())
        .build()
        .expect("connection");

    connection.warmup(BENCH_UID, 0);
    while !connection.is_engine_initialized().await {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let mut tokens = Vec::with_capacity(sessions);
    for _ in 0..sessions {
        let token = SessionToken::next();
        connection.new_session(token, BENCH_UID, None).await;
        tokens.push(token);
    }

    (connection, clock, tokens)
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(
    benches,
    bench_throttler,
    bench_round_trip,
    bench_session_churn
);
criterion_main!(benches);
