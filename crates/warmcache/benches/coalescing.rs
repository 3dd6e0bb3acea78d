// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Benchmarks for hits, misses and coalesced misses.
//!
//! Run with: cargo bench -p warmcache
//! Save baseline: cargo bench -p warmcache -- --save-baseline main
//! Compare to baseline: cargo bench -p warmcache -- --baseline main

#![allow(missing_docs, reason = "benchmark code")]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use taskheap::Scheduler;
use warmcache::{Cache, Computed};
use warmcache_store::{MemoryStore, StoreError};

const TTL: Duration = Duration::from_secs(300);

static KEY_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_key() -> String {
    format!("key_{}", KEY_COUNTER.fetch_add(1, Ordering::Relaxed))
}

async fn load() -> Result<Computed, StoreError> {
    Ok(Computed::cacheable("value"))
}

fn new_cache() -> Cache<StoreError> {
    Cache::new(MemoryStore::new(), Scheduler::new())
}

/// Baseline: the key is already stored, so no computation runs.
fn bench_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let cache = new_cache();
    rt.block_on(cache.get_or_set_fn(b"hot", load, TTL, None))
        .expect("Failed to fill the cache");

    c.bench_function("hit", |b| {
        b.to_async(&rt).iter(|| {
            let cache = cache.clone();
            async move { cache.get_or_set_fn(b"hot", load, TTL, None).await }
        });
    });
}

/// A miss on a fresh key: one computation and one store write.
fn bench_miss(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let cache = new_cache();

    c.bench_function("miss", |b| {
        b.to_async(&rt).iter(|| {
            let cache = cache.clone();
            async move {
                let key = unique_key();
                cache.get_or_set_fn(key.as_bytes(), load, TTL, None).await
            }
        });
    });
}

/// 100 concurrent misses on one fresh key, collapsed into a single computation.
fn bench_coalesced_misses(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let cache = new_cache();

    c.bench_function("coalesced_miss_100", |b| {
        b.to_async(&rt).iter(|| {
            let cache = cache.clone();
            async move {
                let key = unique_key();
                let tasks: Vec<_> = (0..100)
                    .map(|_| {
                        let cache = cache.clone();
                        let key = key.clone();
                        tokio::spawn(async move { cache.get_or_set_fn(key.as_bytes(), load, TTL, None).await })
                    })
                    .collect();

                for task in tasks {
                    task.await.expect("Task panicked").expect("Lookup failed");
                }
            }
        });
    });
}

criterion_group!(benches, bench_hit, bench_miss, bench_coalesced_misses);

criterion_main!(benches);
