//! Benchmarks for the two hot paths exercised on every `fetch()` call:
//! query-key derivation (run on every resolve) and cache pruning (run on
//! every successful commit unless caching is disabled).

use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use reactive_query::cache::CacheTable;
use reactive_query::key::{query_key, ParamMap, ParamValue};

fn param_map_of_size(n: usize) -> ParamMap {
    (0..n)
        .map(|i| (format!("param_{i}"), ParamValue::from(i as i64)))
        .collect()
}

fn bench_query_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_key");
    for &size in &[1usize, 4, 16, 64] {
        let params = param_map_of_size(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &params, |b, params| {
            b.iter(|| query_key(params));
        });
    }
    group.finish();
}

fn bench_cache_prune(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_prune");
    for &size in &[16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let base = Instant::now();
                    let mut cache: CacheTable<u64> = CacheTable::default();
                    for i in 0..size {
                        let age = Duration::from_millis((i % 200) as u64);
                        cache.record_success(&format!("k{i}"), Some(i as u64), Duration::from_millis(100), base - age);
                    }
                    (cache, base)
                },
                |(mut cache, base)| {
                    cache.prune(base, "k0", None);
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_query_key, bench_cache_prune);
criterion_main!(benches);
