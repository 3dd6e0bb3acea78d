// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock store for testing.
//!
//! [`MockStore`] keeps entries in a plain map, records every operation and can be told to fail
//! operations on demand, which makes the error paths of code built on [`ByteStore`] testable.
//! TTLs are recorded but never enforced.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{ByteStore, Result, StoreError};

/// A recorded store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// A read of the given key.
    Get(Bytes),
    /// A write of the given key.
    Set {
        /// The key written.
        key: Bytes,
        /// The value written.
        value: Bytes,
        /// The TTL the value was written with.
        ttl: Duration,
    },
    /// A removal of the given key.
    Del(Bytes),
    /// A clear of the whole store.
    Clear,
}

type FailPredicate = Box<dyn Fn(&StoreOp) -> bool + Send + Sync>;

/// A recording, failure-injecting [`ByteStore`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use warmcache_store::ByteStore;
/// use warmcache_store::testing::{MockStore, StoreOp};
///
/// let store = MockStore::new();
/// store.set(b"k", Bytes::from_static(b"v"), Duration::from_secs(1))?;
/// assert_eq!(store.get(b"k")?, Some(Bytes::from_static(b"v")));
///
/// store.fail_when(|op| matches!(op, StoreOp::Set { .. }));
/// assert!(store.set(b"k", Bytes::from_static(b"w"), Duration::ZERO).is_err());
///
/// assert_eq!(store.operations().len(), 3);
/// # Ok::<(), warmcache_store::StoreError>(())
/// ```
#[derive(Clone, Default)]
pub struct MockStore {
    data: Arc<Mutex<HashMap<Bytes, Bytes>>>,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
}

impl Debug for MockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore")
            .field("data", &self.data)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish()
    }
}

impl MockStore {
    /// Creates an empty mock store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation matching `predicate` fail with [`StoreError::Unavailable`].
    ///
    /// Replaces any predicate set before. Failed operations are still recorded.
    pub fn fail_when(&self, predicate: impl Fn(&StoreOp) -> bool + Send + Sync + 'static) {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Stops injecting failures.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Every operation performed so far, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().clone()
    }

    /// Forgets the recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    /// Number of stored entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.data.lock().len()
    }

    /// Returns `true` if an entry exists under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.data.lock().contains_key(key)
    }

    /// Records `op` and returns whether it should fail.
    fn record(&self, op: StoreOp) -> bool {
        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        self.operations.lock().push(op);
        fail
    }
}

impl ByteStore for MockStore {
    fn set(&self, key: &[u8], value: Bytes, ttl: Duration) -> Result<()> {
        let key = Bytes::copy_from_slice(key);
        let op = StoreOp::Set {
            key: key.clone(),
            value: value.clone(),
            ttl,
        };
        if self.record(op) {
            return Err(StoreError::unavailable("injected set failure"));
        }
        self.data.lock().insert(key, value);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        if self.record(StoreOp::Get(Bytes::copy_from_slice(key))) {
            return Err(StoreError::unavailable("injected get failure"));
        }
        Ok(self.data.lock().get(key).cloned())
    }

    fn del(&self, key: &[u8]) -> bool {
        if self.record(StoreOp::Del(Bytes::copy_from_slice(key))) {
            return false;
        }
        self.data.lock().remove(key).is_some()
    }

    fn hit_rate(&self) -> f64 {
        0.0
    }

    fn clear(&self) {
        if !self.record(StoreOp::Clear) {
            self.data.lock().clear();
        }
    }
}
