use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use idresolve::{IdentityEngine, InMemoryContactStore, Observation};

/// Engine over a store holding `clusters` independent clusters of
/// `per_cluster` contacts each.
fn make_engine_with_data(clusters: usize, per_cluster: usize) -> IdentityEngine {
    let engine = IdentityEngine::new(Arc::new(InMemoryContactStore::new()));
    for c in 0..clusters {
        let email = format!("owner{c}@bench.io");
        for p in 0..per_cluster {
            let phone = format!("{}", 10_000 + c * per_cluster + p);
            let obs = Observation::new(Some(&email), Some(&phone)).unwrap();
            engine.resolve(&obs).unwrap();
        }
    }
    engine
}

fn bench_known_identity(c: &mut Criterion) {
    let engine = make_engine_with_data(256, 8);
    let obs = Observation::new(Some("owner17@bench.io"), None).unwrap();

    c.bench_function("resolve/known_identity", |b| {
        b.iter(|| engine.resolve(&obs).unwrap());
    });
}

fn bench_new_primary(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_writes");
    group.throughput(Throughput::Elements(1));

    group.bench_function("new_primary", |b| {
        b.iter_custom(|iters| {
            // Fresh state per sample so store growth does not leak between samples.
            let engine = make_engine_with_data(64, 2);
            let observations: Vec<_> = (0..iters)
                .map(|i| Observation::new(Some(&format!("fresh{i}@bench.io")), None).unwrap())
                .collect();

            let start = Instant::now();
            for obs in &observations {
                engine.resolve(obs).unwrap();
            }
            start.elapsed()
        });
    });

    group.bench_function("bridge_merge", |b| {
        b.iter_custom(|iters| {
            let engine = make_engine_with_data(0, 0);
            let mut bridges = Vec::new();
            for i in 0..iters {
                let email = format!("left{i}@bench.io");
                let phone = format!("{}", 50_000 + i);
                engine.resolve(&Observation::new(Some(&email), None).unwrap()).unwrap();
                engine.resolve(&Observation::new(None, Some(&phone)).unwrap()).unwrap();
                bridges.push(Observation::new(Some(&email), Some(&phone)).unwrap());
            }

            let start = Instant::now();
            for obs in &bridges {
                engine.resolve(obs).unwrap();
            }
            start.elapsed()
        });
    });

    group.finish();
}

criterion_group!(resolve, bench_known_identity, bench_new_primary);
criterion_main!(resolve);
