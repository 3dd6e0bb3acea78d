// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bounded in-memory store backed by moka.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use moka::sync::Cache;

use crate::builder::MemoryStoreBuilder;
use crate::{ByteStore, Result, StoreError};

/// Largest key a [`MemoryStore`] accepts.
pub const MAX_KEY_SIZE: usize = 65_535;

#[derive(Clone)]
struct StoredValue {
    bytes: Bytes,
    ttl: Duration,
}

/// Gives every entry its own lifetime, taken from the TTL it was written with.
struct PerEntryTtl;

impl PerEntryTtl {
    fn lifetime(value: &StoredValue) -> Option<Duration> {
        (!value.ttl.is_zero()).then_some(value.ttl)
    }
}

impl moka::Expiry<Bytes, StoredValue> for PerEntryTtl {
    fn expire_after_create(&self, _key: &Bytes, value: &StoredValue, _created_at: Instant) -> Option<Duration> {
        Self::lifetime(value)
    }

    fn expire_after_update(
        &self,
        _key: &Bytes,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Self::lifetime(value)
    }
}

/// Read statistics of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub struct StoreStats {
    /// Reads that found a live entry.
    pub hits: u64,
    /// Reads that found nothing, including expired entries.
    pub misses: u64,
    /// Number of live entries.
    pub entries: u64,
}

/// A process-local [`ByteStore`] bounded by total byte size.
///
/// Entries are weighed by key length plus value length, and the store evicts with moka's
/// `TinyLFU` policy once the sum reaches the configured capacity. Each entry expires
/// according to the TTL it was last written with.
///
/// Clones share the same storage.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use warmcache_store::{ByteStore, MemoryStore};
///
/// let store = MemoryStore::with_capacity(1024 * 1024);
/// store.set(b"greeting", Bytes::from_static(b"hello"), Duration::from_secs(60))?;
///
/// assert_eq!(store.get(b"greeting")?.as_deref(), Some(&b"hello"[..]));
/// assert_eq!(store.get(b"missing")?, None);
/// assert_eq!(store.hit_rate(), 0.5);
/// # Ok::<(), warmcache_store::StoreError>(())
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    inner: Cache<Bytes, StoredValue>,
    counters: Arc<Counters>,
    capacity_bytes: u64,
    max_value_size: usize,
    name: Option<Arc<str>>,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.name)
            .field("capacity_bytes", &self.capacity_bytes)
            .field("max_value_size", &self.max_value_size)
            .field("entries", &self.inner.entry_count())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a store with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a store holding at most `capacity_bytes` of keys plus values.
    #[must_use]
    pub fn with_capacity(capacity_bytes: u64) -> Self {
        Self::builder().capacity_bytes(capacity_bytes).build()
    }

    /// Creates a builder for configuring a store.
    #[must_use]
    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::new()
    }

    pub(crate) fn from_builder(builder: MemoryStoreBuilder) -> Self {
        let max_value_size = builder.resolved_max_value_size();

        let mut moka = Cache::builder()
            .max_capacity(builder.capacity_bytes)
            .expire_after(PerEntryTtl)
            .weigher(|key: &Bytes, value: &StoredValue| u32::try_from(key.len() + value.bytes.len()).unwrap_or(u32::MAX));
        if let Some(name) = &builder.name {
            moka = moka.name(name);
        }

        Self {
            inner: moka.build(),
            counters: Arc::default(),
            capacity_bytes: builder.capacity_bytes,
            max_value_size,
            name: builder.name.map(Arc::from),
        }
    }

    /// The configured total capacity in bytes.
    #[must_use]
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// The largest value a single entry may carry.
    #[must_use]
    pub fn max_value_size(&self) -> usize {
        self.max_value_size
    }

    /// The configured name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns hit and miss counts along with the live entry count.
    ///
    /// Flushes moka's pending maintenance first so that `entries` reflects recent writes,
    /// evictions and expirations.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.inner.run_pending_tasks();
        StoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entries: self.inner.entry_count(),
        }
    }

    /// Zeroes the hit and miss counters.
    pub fn reset_stats(&self) {
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
    }

    fn check_sizes(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() > MAX_KEY_SIZE {
            return Err(StoreError::KeyTooLarge {
                len: key.len(),
                max: MAX_KEY_SIZE,
            });
        }
        if value.len() > self.max_value_size {
            return Err(StoreError::ValueTooLarge {
                len: value.len(),
                max: self.max_value_size,
            });
        }
        Ok(())
    }

    fn record(&self, hit: bool) {
        let counter = if hit { &self.counters.hits } else { &self.counters.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl ByteStore for MemoryStore {
    fn set(&self, key: &[u8], value: Bytes, ttl: Duration) -> Result<()> {
        self.check_sizes(key, &value)?;
        self.inner.insert(Bytes::copy_from_slice(key), StoredValue { bytes: value, ttl });
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let found = self.inner.get(key).map(|stored| stored.bytes);
        self.record(found.is_some());
        Ok(found)
    }

    fn set_and_get(&self, key: &[u8], value: Bytes, ttl: Duration) -> Result<Option<Bytes>> {
        self.check_sizes(key, &value)?;
        // Not counted as a read.
        let previous = self.inner.get(key).map(|stored| stored.bytes);
        self.inner.insert(Bytes::copy_from_slice(key), StoredValue { bytes: value, ttl });
        Ok(previous)
    }

    fn del(&self, key: &[u8]) -> bool {
        self.inner.remove(key).is_some()
    }

    #[expect(clippy::cast_precision_loss, reason = "a ratio does not need every bit of the counts")]
    fn hit_rate(&self) -> f64 {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }

    fn clear(&self) {
        self.inner.invalidate_all();
    }
}
