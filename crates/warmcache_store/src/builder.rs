// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for configuring a [`MemoryStore`].

use crate::memory::MemoryStore;

/// Total capacity used when none is configured: 64 MiB.
pub const DEFAULT_CAPACITY_BYTES: u64 = 64 * 1024 * 1024;

/// Builder for a [`MemoryStore`].
///
/// # Examples
///
/// ```
/// use warmcache_store::MemoryStore;
///
/// let store = MemoryStore::builder()
///     .capacity_bytes(16 * 1024 * 1024)
///     .max_value_size(64 * 1024)
///     .name("sessions")
///     .build();
///
/// assert_eq!(store.capacity_bytes(), 16 * 1024 * 1024);
/// assert_eq!(store.max_value_size(), 64 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStoreBuilder {
    pub(crate) capacity_bytes: u64,
    pub(crate) max_value_size: Option<usize>,
    pub(crate) name: Option<String>,
}

impl Default for MemoryStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreBuilder {
    /// Creates a builder for a store of [`DEFAULT_CAPACITY_BYTES`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            max_value_size: None,
            name: None,
        }
    }

    /// Sets the total size of keys plus values the store may hold.
    ///
    /// Once full, entries are evicted using moka's `TinyLFU` policy.
    #[must_use]
    pub fn capacity_bytes(mut self, capacity: u64) -> Self {
        self.capacity_bytes = capacity;
        self
    }

    /// Sets the largest value a single entry may carry.
    ///
    /// Defaults to 1/1024 of the capacity so that one entry can never crowd out the rest.
    #[must_use]
    pub fn max_value_size(mut self, max: usize) -> Self {
        self.max_value_size = Some(max);
        self
    }

    /// Names the store. The name shows up in moka's diagnostics and in `Debug` output.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builds the store.
    #[must_use]
    pub fn build(self) -> MemoryStore {
        MemoryStore::from_builder(self)
    }

    pub(crate) fn resolved_max_value_size(&self) -> usize {
        self.max_value_size
            .unwrap_or_else(|| usize::try_from(self.capacity_bytes / 1024).unwrap_or(usize::MAX))
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_limit_defaults_to_fraction_of_capacity() {
        let builder = MemoryStoreBuilder::new().capacity_bytes(1024 * 1024);
        assert_eq!(builder.resolved_max_value_size(), 1024);

        let builder = builder.max_value_size(10);
        assert_eq!(builder.resolved_max_value_size(), 10);
    }

    #[test]
    fn default_matches_new() {
        let builder = MemoryStoreBuilder::default();
        assert_eq!(builder.capacity_bytes, DEFAULT_CAPACITY_BYTES);
        assert!(builder.name.is_none());
    }
}
