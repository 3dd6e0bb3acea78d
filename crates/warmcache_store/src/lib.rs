// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Byte-oriented key/value storage with per-entry TTLs.
//!
//! [`ByteStore`] is the storage capability a refresh-ahead cache writes through: opaque byte
//! keys, [`Bytes`](bytes::Bytes) values, a TTL per write, hit-rate reporting and bulk clear.
//! [`MemoryStore`] implements it on top of a moka cache bounded by total byte size.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use warmcache_store::{ByteStore, MemoryStore};
//!
//! let store = MemoryStore::builder().capacity_bytes(4 * 1024 * 1024).name("profiles").build();
//!
//! store.set(b"user:1", Bytes::from_static(b"{\"name\":\"ada\"}"), Duration::from_secs(30))?;
//! let previous = store.set_and_get(b"user:1", Bytes::from_static(b"{}"), Duration::ZERO)?;
//! assert!(previous.is_some());
//!
//! assert!(store.del(b"user:1"));
//! assert_eq!(store.get(b"user:1")?, None);
//! # Ok::<(), warmcache_store::StoreError>(())
//! ```
//!
//! # Testing
//!
//! The `test-util` feature exposes [`testing::MockStore`], which records operations and can
//! inject failures.

mod builder;
mod error;
mod memory;
mod store;

#[cfg(any(feature = "test-util", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod testing;

pub use builder::{DEFAULT_CAPACITY_BYTES, MemoryStoreBuilder};
pub use error::{Result, StoreError};
pub use memory::{MAX_KEY_SIZE, MemoryStore, StoreStats};
pub use store::ByteStore;
