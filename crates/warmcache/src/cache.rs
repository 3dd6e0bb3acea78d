// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt::{Debug, Write};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use taskheap::{Scheduler, TaskError};
use warmcache_store::{ByteStore, MemoryStore, StoreError};

use crate::builder::CacheBuilder;
use crate::flight::{Flights, Landed};

/// Called with the key and the new value after a computed value has been written.
pub type OnUpdate = Arc<dyn Fn(&[u8], &Bytes) + Send + Sync>;

/// The result of a compute callback: a value and whether it may be cached.
///
/// A transient value is handed to every waiting caller but never written, which suits
/// results that are valid for this request only, such as a fallback served while a backend
/// is degraded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Computed {
    value: Bytes,
    cacheable: bool,
}

impl Computed {
    /// A value that is written to the store.
    pub fn cacheable(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
            cacheable: true,
        }
    }

    /// A value that is returned but not written to the store.
    pub fn transient(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
            cacheable: false,
        }
    }

    /// The computed value.
    #[must_use]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Returns `true` if the value is written to the store.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }
}

/// The value returned by a get-or-compute call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Lookup {
    /// The cached or computed value.
    pub value: Bytes,

    /// `false` only for the one caller whose own computation produced the value.
    pub cache_hit: bool,

    /// `true` if the value came from a computation started by a concurrent caller.
    pub shared: bool,
}

impl Lookup {
    fn hit(value: Bytes) -> Self {
        Self {
            value,
            cache_hit: true,
            shared: false,
        }
    }
}

/// What a coalesced computation hands to each of its waiters.
#[derive(Debug, Clone)]
struct Filled {
    value: Bytes,

    /// `false` if the value was found in the store after all.
    computed: bool,
    stored: bool,
}

/// A get-or-compute byte cache with stampede protection and refresh-ahead.
///
/// Reads go straight to the [`ByteStore`]. On a miss, concurrent callers asking for the same
/// key are collapsed into a single computation: one caller runs its compute callback, writes
/// the result and every other caller receives that same result. Compute failures reach every
/// waiting caller unchanged and leave the store untouched.
///
/// [`get_or_refresh_fn`](Self::get_or_refresh_fn) additionally registers a recurring task
/// with the [`Scheduler`] that recomputes the value every refresh interval, so readers of hot
/// keys keep hitting a warm entry. Background refreshes go through the same coalescing as
/// reads. Their failures are reported to the scheduler's error sink, and readers keep seeing
/// the last good value until its safety-net TTL runs out.
///
/// `E` is the caller's own error type. The cache does not wrap it; it only needs to be able to
/// carry a [`StoreError`].
///
/// `Cache` is a cheap handle; clones share the same state. When the last handle is dropped,
/// every refresh task it registered is removed from the scheduler.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use taskheap::Scheduler;
/// use warmcache::{Cache, Computed};
/// use warmcache_store::{MemoryStore, StoreError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), StoreError> {
/// let cache: Cache<StoreError> = Cache::new(MemoryStore::new(), Scheduler::new());
///
/// let load = || async { Ok(Computed::cacheable("expensive")) };
///
/// let first = cache.get_or_set_fn(b"report", load, Duration::from_secs(60), None).await?;
/// assert!(!first.cache_hit);
///
/// let second = cache.get_or_set_fn(b"report", load, Duration::from_secs(60), None).await?;
/// assert!(second.cache_hit);
/// assert_eq!(second.value, "expensive");
/// # Ok(())
/// # }
/// ```
pub struct Cache<E, S = MemoryStore> {
    inner: Arc<CacheInner<E, S>>,
}

struct CacheInner<E, S> {
    name: Cow<'static, str>,
    store: Arc<S>,
    scheduler: Scheduler,
    flights: Flights<Result<Filled, E>>,
    refresh_ttl_factor: u32,

    /// Ids of the scheduler tasks this cache registered.
    refresh_tasks: Mutex<HashSet<String>>,
}

impl<E, S> Clone for Cache<E, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E, S: Debug> Debug for Cache<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.inner.name)
            .field("store", &self.inner.store)
            .field("refresh_ttl_factor", &self.inner.refresh_ttl_factor)
            .field("refresh_tasks", &self.inner.refresh_tasks.lock().len())
            .finish_non_exhaustive()
    }
}

impl<E, S: ByteStore> Cache<E, S> {
    /// Creates a cache with default settings.
    ///
    /// The scheduler has to be [started](Scheduler::start) for background refreshes to run.
    #[must_use]
    pub fn new(store: S, scheduler: Scheduler) -> Self {
        Self::builder(store, scheduler).build()
    }

    /// Creates a builder for configuring a cache.
    #[must_use]
    pub fn builder(store: S, scheduler: Scheduler) -> CacheBuilder<E, S> {
        CacheBuilder::new(store, scheduler)
    }

    pub(crate) fn from_builder(builder: CacheBuilder<E, S>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                name: builder.name,
                store: Arc::new(builder.store),
                scheduler: builder.scheduler,
                flights: Flights::default(),
                refresh_ttl_factor: builder.refresh_ttl_factor,
                refresh_tasks: Mutex::default(),
            }),
        }
    }

    /// The name of this cache.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// How many refresh intervals a refreshed entry lives after its last write.
    #[must_use]
    pub fn refresh_ttl_factor(&self) -> u32 {
        self.inner.refresh_ttl_factor
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// The scheduler running this cache's refresh tasks.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Writes a value directly, bypassing any computation.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the write fails.
    pub fn set(&self, key: &[u8], value: impl Into<Bytes>, ttl: Duration) -> warmcache_store::Result<()> {
        self.inner.store.set(key, value.into(), ttl)
    }

    /// Reads a value directly. A miss is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the read fails.
    pub fn get(&self, key: &[u8]) -> warmcache_store::Result<Option<Bytes>> {
        self.inner.store.get(key)
    }

    /// Appends the value under `key` to `buf`, returning whether it was found.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the read fails.
    pub fn get_with_buf(&self, key: &[u8], buf: &mut Vec<u8>) -> warmcache_store::Result<bool> {
        self.inner.store.get_with_buf(key, buf)
    }

    /// Writes a value and returns the one it replaced.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the read or the write fails.
    pub fn set_and_get(&self, key: &[u8], value: impl Into<Bytes>, ttl: Duration) -> warmcache_store::Result<Option<Bytes>> {
        self.inner.store.set_and_get(key, value.into(), ttl)
    }

    /// Removes the entry under `key`.
    ///
    /// A refresh task for the key keeps running and writes the entry again on its next
    /// firing. Use [`cancel_refresh`](Self::cancel_refresh) to stop it.
    pub fn del(&self, key: &[u8]) -> bool {
        self.inner.store.del(key)
    }

    /// The store's hit rate.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        self.inner.store.hit_rate()
    }

    /// Removes every entry from the store. Refresh tasks are left alone.
    pub fn clear(&self) {
        self.inner.store.clear();
    }

    /// Stops the background refresh of `key`. Returns `false` if it was not being refreshed.
    ///
    /// The entry stays in the store until its safety-net TTL runs out.
    pub fn cancel_refresh(&self, key: &[u8]) -> bool {
        let task_id = self.inner.refresh_task_id(key);
        if !self.inner.refresh_tasks.lock().remove(&task_id) {
            return false;
        }

        let removed = self.inner.scheduler.remove_task(&task_id);
        tracing::debug!(cache = %self.inner.name, task_id, "refresh cancelled");
        removed
    }

    /// Returns `true` if `key` is being refreshed in the background.
    #[must_use]
    pub fn is_refreshing(&self, key: &[u8]) -> bool {
        self.inner.refresh_tasks.lock().contains(&self.inner.refresh_task_id(key))
    }

    /// Number of keys this cache refreshes in the background.
    #[must_use]
    pub fn refresh_task_count(&self) -> usize {
        self.inner.refresh_tasks.lock().len()
    }
}

impl<E, S> Cache<E, S>
where
    E: Clone + From<StoreError> + std::error::Error + Send + Sync + 'static,
    S: ByteStore,
{
    /// Returns the value under `key`, computing and storing it on a miss.
    ///
    /// Among concurrent callers missing on the same key only one runs `compute`; the others
    /// wait for it and get its result with [`Lookup::shared`] set. A cacheable result is
    /// written with `ttl` (zero means no expiry) and then passed to `on_update`. Dropping the
    /// returned future does not cancel a computation other callers are waiting on.
    ///
    /// # Errors
    ///
    /// Returns the error of `compute` or of the store to every waiting caller. Nothing is
    /// written in that case.
    ///
    /// # Panics
    ///
    /// A panic inside `compute` is resumed in every waiting caller.
    pub async fn get_or_set_fn<F, Fut>(&self, key: &[u8], compute: F, ttl: Duration, on_update: Option<OnUpdate>) -> Result<Lookup, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Computed, E>> + Send + 'static,
    {
        if let Some(value) = self.inner.store.get(key)? {
            return Ok(Lookup::hit(value));
        }

        let landed = self.inner.fill(key, compute, ttl, on_update, true).await;
        Ok(to_lookup(landed)?.0)
    }

    /// Like [`get_or_set_fn`](Self::get_or_set_fn), but keeps the key warm in the background.
    ///
    /// The entry is written with a TTL of `refresh_interval` times the
    /// [refresh TTL factor](CacheBuilder::refresh_ttl_factor). Once this call has stored a
    /// value, a recurring task is registered with the scheduler that runs `compute` every
    /// `refresh_interval` and rewrites the entry, whether or not anyone reads it. Further calls
    /// for a key that is already refreshed do not register a second task.
    ///
    /// A zero `refresh_interval` stores the value without expiry and registers nothing.
    ///
    /// # Errors
    ///
    /// Returns the error of `compute` or of the store for the initial computation. Failures of
    /// background refreshes go to the scheduler's error sink.
    ///
    /// # Panics
    ///
    /// A panic inside the initial `compute` is resumed in every waiting caller.
    pub async fn get_or_refresh_fn<F, Fut>(
        &self,
        key: &[u8],
        compute: F,
        refresh_interval: Duration,
        on_update: Option<OnUpdate>,
    ) -> Result<Lookup, E>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Computed, E>> + Send + 'static,
    {
        if let Some(value) = self.inner.store.get(key)? {
            return Ok(Lookup::hit(value));
        }

        let compute = Arc::new(compute);
        let ttl = refresh_interval.saturating_mul(self.inner.refresh_ttl_factor);

        let initial = Arc::clone(&compute);
        let landed = self.inner.fill(key, move || initial(), ttl, on_update.clone(), true).await;
        let (lookup, stored) = to_lookup(landed)?;

        if stored && !lookup.shared && !refresh_interval.is_zero() {
            self.register_refresh(key, compute, refresh_interval, ttl, on_update);
        }
        Ok(lookup)
    }

    fn register_refresh<F, Fut>(&self, key: &[u8], compute: Arc<F>, interval: Duration, ttl: Duration, on_update: Option<OnUpdate>)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Computed, E>> + Send + 'static,
    {
        let task_id = self.inner.refresh_task_id(key);
        let weak = Arc::downgrade(&self.inner);
        let key = Bytes::copy_from_slice(key);

        let callback = move || {
            let weak = Weak::clone(&weak);
            let key = key.clone();
            let compute = Arc::clone(&compute);
            let on_update = on_update.clone();
            async move {
                // The cache is being dropped and takes its tasks with it.
                let Some(inner) = weak.upgrade() else {
                    return Ok(());
                };
                inner.refresh(&key, compute, ttl, on_update).await.map_err(TaskError::from_source)
            }
        };

        match self.inner.scheduler.add_task(&task_id, interval, callback) {
            Ok(()) => {
                tracing::debug!(cache = %self.inner.name, task_id, ?interval, "refresh registered");
                self.inner.refresh_tasks.lock().insert(task_id);
            }
            Err(taskheap::Error::DuplicateTask(_)) => {
                tracing::debug!(cache = %self.inner.name, task_id, "refresh already registered");
            }
            Err(error) => {
                tracing::warn!(cache = %self.inner.name, task_id, %error, "refresh registration failed");
            }
        }
    }
}

impl<E, S> CacheInner<E, S> {
    fn refresh_task_id(&self, key: &[u8]) -> String {
        let mut id = format!("{}/refresh", self.name);
        match std::str::from_utf8(key) {
            Ok(text) => {
                id.push('/');
                id.push_str(text);
            }
            Err(_) => {
                id.push_str("-hex/");
                for byte in key {
                    // Writing to a String cannot fail.
                    _ = write!(id, "{byte:02x}");
                }
            }
        }
        id
    }
}

impl<E, S> CacheInner<E, S>
where
    E: Clone + From<StoreError> + Send + Sync + 'static,
    S: ByteStore,
{
    /// Computes and stores the value for `key` through the coalescing group.
    fn fill<F, Fut>(
        &self,
        key: &[u8],
        compute: F,
        ttl: Duration,
        on_update: Option<OnUpdate>,
        recheck: bool,
    ) -> impl Future<Output = Landed<Result<Filled, E>>> + Send + use<E, S, F, Fut>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Computed, E>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let owned_key = Bytes::copy_from_slice(key);
        self.flights
            .work(key, move || compute_and_store(store, owned_key, compute, ttl, on_update, recheck))
    }

    async fn refresh<F, Fut>(&self, key: &Bytes, compute: Arc<F>, ttl: Duration, on_update: Option<OnUpdate>) -> Result<(), E>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Computed, E>> + Send + 'static,
    {
        tracing::trace!(cache = %self.name, "refreshing entry");
        let landed = self.fill(key, move || compute(), ttl, on_update, false).await;
        landed.value.map(|_| ())
    }
}

impl<E, S> Drop for CacheInner<E, S> {
    fn drop(&mut self) {
        for task_id in self.refresh_tasks.get_mut().drain() {
            self.scheduler.remove_task(&task_id);
        }
    }
}

async fn compute_and_store<S, E, F, Fut>(
    store: Arc<S>,
    key: Bytes,
    compute: F,
    ttl: Duration,
    on_update: Option<OnUpdate>,
    recheck: bool,
) -> Result<Filled, E>
where
    S: ByteStore,
    E: From<StoreError>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Computed, E>>,
{
    // Another caller may have filled the key between our miss and taking the lead.
    if recheck && let Some(value) = store.get(&key)? {
        return Ok(Filled {
            value,
            computed: false,
            stored: false,
        });
    }

    let Computed { value, cacheable } = compute().await?;
    if cacheable {
        store.set(&key, value.clone(), ttl)?;
        if let Some(on_update) = on_update {
            on_update(&key, &value);
        }
    }

    Ok(Filled {
        value,
        computed: true,
        stored: cacheable,
    })
}

/// Turns one caller's outcome into its [`Lookup`], plus whether the value was written.
fn to_lookup<E>(landed: Landed<Result<Filled, E>>) -> Result<(Lookup, bool), E> {
    let Landed { value, shared } = landed;
    let filled = value?;
    let lookup = Lookup {
        value: filled.value,
        cache_hit: shared || !filled.computed,
        shared,
    };
    Ok((lookup, filled.stored))
}
