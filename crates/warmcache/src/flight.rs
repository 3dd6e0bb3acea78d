// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-key coalescing of concurrent computations.
//!
//! The first caller for a key installs a [`Shared`] future in the map and every caller that
//! arrives before it finishes awaits a clone of it. The map keeps its own clone, so a
//! computation abandoned by all of its callers is resumed by the next one instead of being
//! lost. The entry is removed by the computation itself once it finishes, panics included.
//! The computation only holds a weak reference to the map, so dropping the map drops every
//! computation nobody awaits any more.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

type Calls<T> = Mutex<HashMap<Bytes, Call<T>>>;

type Call<T> = Shared<BoxFuture<'static, Result<T, Panicked>>>;

/// A panic captured inside a coalesced computation, kept as text so it can be cloned to
/// every waiter.
#[derive(Debug, Clone)]
struct Panicked(Arc<str>);

impl Panicked {
    fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| Arc::from(*s))
            .or_else(|| payload.downcast_ref::<String>().map(|s| Arc::from(s.as_str())))
            .unwrap_or_else(|| Arc::from("non-string panic payload"));
        Self(message)
    }
}

/// The outcome seen by one caller.
#[derive(Debug)]
pub(crate) struct Landed<T> {
    pub(crate) value: T,

    /// `true` if the value was produced by a computation another caller started.
    pub(crate) shared: bool,
}

pub(crate) struct Flights<T> {
    calls: Arc<Calls<T>>,
}

impl<T> Default for Flights<T> {
    fn default() -> Self {
        Self { calls: Arc::default() }
    }
}

impl<T> Flights<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Runs `func` for `key` unless a computation for `key` is already in flight, in which
    /// case the caller waits for that one instead.
    ///
    /// A panic in `func` is re-raised in every caller waiting on it.
    pub(crate) fn work<F, Fut>(&self, key: &[u8], func: F) -> impl Future<Output = Landed<T>> + Send + use<T, F, Fut>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (future, shared) = {
            let mut calls = self.calls.lock();
            if let Some(call) = calls.get(key) {
                (call.clone(), true)
            } else {
                let key = Bytes::copy_from_slice(key);
                let future = leader(Arc::downgrade(&self.calls), key.clone(), func).boxed().shared();
                calls.insert(key, future.clone());
                (future, false)
            }
        };

        async move {
            match future.await {
                Ok(value) => Landed { value, shared },
                Err(Panicked(message)) => std::panic::resume_unwind(Box::new(message.to_string())),
            }
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

async fn leader<T, F, Fut>(calls: Weak<Calls<T>>, key: Bytes, func: F) -> Result<T, Panicked>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let outcome = AssertUnwindSafe(async move { func().await }).catch_unwind().await;

    // Only this computation can have installed the entry, and it stays until now.
    if let Some(calls) = calls.upgrade() {
        calls.lock().remove(&key);
    }

    outcome.map_err(|payload| Panicked::from_payload(&*payload))
}
