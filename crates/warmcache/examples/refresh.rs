// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Refresh-ahead: a hot key is recomputed in the background on a fixed interval, so readers
//! keep hitting a warm value long after its first TTL would have run out.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use taskheap::Scheduler;
use warmcache::{Cache, Computed, OnUpdate};
use warmcache_store::{MemoryStore, StoreError};

const REFRESH_INTERVAL: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<(), StoreError> {
    let scheduler = Scheduler::builder().name("example").build();
    scheduler.start().expect("started inside the tokio runtime");

    let cache: Cache<StoreError> = Cache::builder(MemoryStore::new(), scheduler.clone())
        .name("quotes")
        .build();

    // Stands in for an expensive query; every run yields a new version of the quote
    let queries = Arc::new(AtomicUsize::new(0));
    let query = {
        let queries = Arc::clone(&queries);
        move || {
            let version = queries.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Computed::cacheable(format!("quote v{version}")))
            }
        }
    };

    let on_update: OnUpdate = Arc::new(|key: &[u8], value: &Bytes| {
        println!(
            "  [refresh] {} -> {}",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        );
    });

    println!("Reading quote:msft every 50ms for one second...\n");

    let mut hits = 0;
    for _ in 0..20 {
        let lookup = cache
            .get_or_refresh_fn(b"quote:msft", query.clone(), REFRESH_INTERVAL, Some(Arc::clone(&on_update)))
            .await?;
        if lookup.cache_hit {
            hits += 1;
        }
        println!(
            "  [read] {} (cache hit: {})",
            String::from_utf8_lossy(&lookup.value),
            lookup.cache_hit
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let total = queries.load(Ordering::SeqCst);
    println!("\n{hits} of 20 reads were hits; the query ran {total} time(s), all but one in the background.");

    assert!(cache.cancel_refresh(b"quote:msft"));
    scheduler.stop().await;
    Ok(())
}
