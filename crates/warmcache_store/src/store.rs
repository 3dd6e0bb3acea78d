// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The [`ByteStore`] trait.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::Result;

/// Byte-keyed, byte-valued storage with per-entry expiry.
///
/// This is the capability a refresh-ahead cache writes through. Implementations own
/// capacity, eviction and expiry; callers only decide what to write and how long it lives.
/// Implementations must be safe to call from many threads at once.
///
/// A `ttl` of [`Duration::ZERO`] means the entry never expires, although it may still be
/// evicted when the store is full.
///
/// # Implementing a Store
///
/// Only `set`, `get`, `del`, `hit_rate` and `clear` are required:
///
/// ```
/// use std::collections::HashMap;
/// use std::sync::Mutex;
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use warmcache_store::{ByteStore, Result};
///
/// #[derive(Default)]
/// struct Unbounded(Mutex<HashMap<Vec<u8>, Bytes>>);
///
/// impl ByteStore for Unbounded {
///     fn set(&self, key: &[u8], value: Bytes, _ttl: Duration) -> Result<()> {
///         self.0.lock().unwrap().insert(key.to_vec(), value);
///         Ok(())
///     }
///
///     fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
///         Ok(self.0.lock().unwrap().get(key).cloned())
///     }
///
///     fn del(&self, key: &[u8]) -> bool {
///         self.0.lock().unwrap().remove(key).is_some()
///     }
///
///     fn hit_rate(&self) -> f64 {
///         0.0
///     }
///
///     fn clear(&self) {
///         self.0.lock().unwrap().clear();
///     }
/// }
///
/// let store = Unbounded::default();
/// let previous = store.set_and_get(b"k", Bytes::from_static(b"v1"), Duration::ZERO)?;
/// assert_eq!(previous, None);
///
/// let mut buf = b"prefix:".to_vec();
/// assert!(store.get_with_buf(b"k", &mut buf)?);
/// assert_eq!(buf, b"prefix:v1");
/// # Ok::<(), warmcache_store::StoreError>(())
/// ```
pub trait ByteStore: Send + Sync + 'static {
    /// Writes `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be stored, for example because it is too large.
    fn set(&self, key: &[u8], value: Bytes, ttl: Duration) -> Result<()>;

    /// Reads the value under `key`. A missing or expired entry is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Appends the value under `key` to `buf`, returning whether the key was found.
    ///
    /// Lets callers reuse one buffer across many reads.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get_with_buf(&self, key: &[u8], buf: &mut Vec<u8>) -> Result<bool> {
        Ok(self.get(key)?.is_some_and(|value| {
            buf.extend_from_slice(&value);
            true
        }))
    }

    /// Writes `value` under `key` and returns the value it replaced, if any.
    ///
    /// The default implementation performs a read followed by a write, so a concurrent writer
    /// may land in between.
    ///
    /// # Errors
    ///
    /// Returns an error if the read or the write fails.
    fn set_and_get(&self, key: &[u8], value: Bytes, ttl: Duration) -> Result<Option<Bytes>> {
        let previous = self.get(key)?;
        self.set(key, value, ttl)?;
        Ok(previous)
    }

    /// Removes the entry under `key`, returning whether one was present.
    fn del(&self, key: &[u8]) -> bool;

    /// Fraction of reads that found a live entry, in `0.0..=1.0`.
    fn hit_rate(&self) -> f64;

    /// Removes every entry.
    fn clear(&self);
}

impl<S: ByteStore + ?Sized> ByteStore for Arc<S> {
    fn set(&self, key: &[u8], value: Bytes, ttl: Duration) -> Result<()> {
        (**self).set(key, value, ttl)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        (**self).get(key)
    }

    fn get_with_buf(&self, key: &[u8], buf: &mut Vec<u8>) -> Result<bool> {
        (**self).get_with_buf(key, buf)
    }

    fn set_and_get(&self, key: &[u8], value: Bytes, ttl: Duration) -> Result<Option<Bytes>> {
        (**self).set_and_get(key, value, ttl)
    }

    fn del(&self, key: &[u8]) -> bool {
        (**self).del(key)
    }

    fn hit_rate(&self) -> f64 {
        (**self).hit_rate()
    }

    fn clear(&self) {
        (**self).clear();
    }
}
