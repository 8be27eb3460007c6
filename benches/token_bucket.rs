use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use hostpace::{
    Context, Limit, Metrics, Request, RequestBody, ResponseBody, RetryingLimiterTransport,
    SystemClock, TokenBucket, TransportOptions, round_trip_fn,
};

const UNCONTENDED: Limit = Limit::new(1.0e9, 1_000_000);

fn bench_bucket_acquire(c: &mut Criterion) {
    let bucket = TokenBucket::new(UNCONTENDED, Arc::new(SystemClock));
    let context = Context::new();

    let mut group = c.benchmark_group("token_bucket_acquire");
    group.throughput(Throughput::Elements(1));
    group.bench_function("try_acquire", |b| {
        b.iter(|| black_box(bucket.try_acquire()));
    });
    group.bench_function("wait", |b| {
        b.iter(|| {
            bucket
                .wait(black_box(&context))
                .expect("uncontended wait should succeed");
        });
    });
    group.finish();
}

fn bench_contended_acquire(c: &mut Criterion) {
    let bucket = Arc::new(TokenBucket::new(UNCONTENDED, Arc::new(SystemClock)));

    let mut group = c.benchmark_group("token_bucket_contended");
    group.sample_size(40);
    for threads in [2_usize, 4, 8] {
        group.throughput(Throughput::Elements((threads * 256) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &threads| {
                b.iter(|| {
                    std::thread::scope(|scope| {
                        for _ in 0..threads {
                            let bucket = Arc::clone(&bucket);
                            scope.spawn(move || {
                                let context = Context::new();
                                for _ in 0..256 {
                                    bucket
                                        .wait(&context)
                                        .expect("contended wait should succeed");
                                }
                            });
                        }
                    });
                });
            },
        );
    }
    group.finish();
}

fn bench_transport_overhead(c: &mut Criterion) {
    let transport = RetryingLimiterTransport::new(
        round_trip_fn(|_request: Request| {
            Ok(http::Response::builder()
                .status(200)
                .body(ResponseBody::empty())
                .expect("response should build"))
        }),
        TransportOptions::standard()
            .metrics(Metrics::new())
            .default_limit(UNCONTENDED),
    );

    let mut group = c.benchmark_group("transport_overhead");
    group.bench_function("get_200_in_memory", |b| {
        b.iter(|| {
            let request = http::Request::get("https://bench.example.com/v1/ping")
                .body(RequestBody::Empty)
                .expect("request should build");
            let response = transport
                .round_trip(request)
                .expect("in-memory round trip should succeed");
            black_box(response.status());
        });
    });
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_secs(1))
        .measurement_time(Duration::from_secs(4));
    targets = bench_bucket_acquire, bench_contended_acquire, bench_transport_overhead
);
criterion_main!(benches);
