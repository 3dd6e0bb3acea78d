// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Stampede-safe get-or-compute byte cache with refresh-ahead.
//!
//! [`Cache`] sits in front of an expensive computation, typically a database query keyed by
//! a fingerprint of the query and its parameters. It solves two problems:
//!
//! - **Stampedes.** When many callers miss on the same key at once, only one of them runs
//!   the computation. The rest wait and receive its result, including its error.
//! - **Expiry latency.** With [`Cache::get_or_refresh_fn`] a hot key is recomputed on a fixed
//!   schedule by a [`taskheap::Scheduler`] task, so readers keep hitting a warm value instead
//!   of paying for recomputation when the entry expires.
//!
//! Values are stored as bytes in any [`ByteStore`](warmcache_store::ByteStore); the default
//! is the moka-backed [`MemoryStore`](warmcache_store::MemoryStore).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use taskheap::Scheduler;
//! use warmcache::{Cache, Computed, OnUpdate};
//! use warmcache_store::{MemoryStore, StoreError};
//!
//! #[derive(Debug, Clone, thiserror::Error)]
//! enum QueryError {
//!     #[error("database unavailable")]
//!     Unavailable,
//!     #[error(transparent)]
//!     Store(#[from] StoreError),
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), QueryError> {
//! let scheduler = Scheduler::new();
//! scheduler.start().expect("inside a runtime");
//!
//! let cache: Cache<QueryError> = Cache::builder(MemoryStore::new(), scheduler.clone())
//!     .name("top-products")
//!     .build();
//!
//! let on_update: OnUpdate = Arc::new(|key: &[u8], value: &bytes::Bytes| {
//!     println!("{} refreshed to {} bytes", String::from_utf8_lossy(key), value.len());
//! });
//!
//! let lookup = cache
//!     .get_or_refresh_fn(
//!         b"top:10",
//!         || async { Ok(Computed::cacheable(r#"["kettle","toaster"]"#)) },
//!         Duration::from_secs(30),
//!         Some(on_update),
//!     )
//!     .await?;
//!
//! assert!(!lookup.cache_hit);
//! assert!(cache.is_refreshing(b"top:10"));
//!
//! scheduler.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//!
//! The cache has no error type of its own. Compute callbacks return the caller's error type
//! `E`, which only has to be able to carry a [`StoreError`](warmcache_store::StoreError), and
//! that error comes back unchanged. Errors of background refreshes have no caller to return
//! to and go to the scheduler's [`ErrorSink`](taskheap::ErrorSink).

mod builder;
mod cache;
mod flight;

pub use builder::{CacheBuilder, DEFAULT_REFRESH_TTL_FACTOR};
pub use cache::{Cache, Computed, Lookup, OnUpdate};
