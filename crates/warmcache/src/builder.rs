// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::marker::PhantomData;

use taskheap::Scheduler;
use warmcache_store::ByteStore;

use crate::cache::Cache;

/// Multiplier applied to the refresh interval to obtain the safety-net TTL of refreshed entries.
pub const DEFAULT_REFRESH_TTL_FACTOR: u32 = 2;

/// Builder for a [`Cache`].
///
/// # Examples
///
/// ```
/// use taskheap::Scheduler;
/// use warmcache::Cache;
/// use warmcache_store::{MemoryStore, StoreError};
///
/// let cache: Cache<StoreError> = Cache::builder(MemoryStore::new(), Scheduler::new())
///     .name("catalog")
///     .refresh_ttl_factor(3)
///     .build();
///
/// assert_eq!(cache.name(), "catalog");
/// assert_eq!(cache.refresh_ttl_factor(), 3);
/// ```
#[derive(Debug)]
pub struct CacheBuilder<E, S> {
    pub(crate) store: S,
    pub(crate) scheduler: Scheduler,
    pub(crate) name: Cow<'static, str>,
    pub(crate) refresh_ttl_factor: u32,
    _error: PhantomData<fn() -> E>,
}

impl<E, S: ByteStore> CacheBuilder<E, S> {
    pub(crate) fn new(store: S, scheduler: Scheduler) -> Self {
        Self {
            store,
            scheduler,
            name: Cow::Borrowed("cache"),
            refresh_ttl_factor: DEFAULT_REFRESH_TTL_FACTOR,
            _error: PhantomData,
        }
    }

    /// Names the cache.
    ///
    /// The name prefixes the ids of refresh tasks, so caches sharing a scheduler need
    /// distinct names.
    #[must_use]
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets how many refresh intervals a refreshed entry outlives its last write.
    ///
    /// The entry then survives missed refreshes for that long before it goes cold. Values
    /// below 1 are raised to 1.
    #[must_use]
    pub fn refresh_ttl_factor(mut self, factor: u32) -> Self {
        self.refresh_ttl_factor = factor.max(1);
        self
    }

    /// Builds the cache.
    #[must_use]
    pub fn build(self) -> Cache<E, S> {
        Cache::from_builder(self)
    }
}
