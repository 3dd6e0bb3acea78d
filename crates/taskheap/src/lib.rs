// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Named one-shot and periodic async tasks on a single min-heap control loop.
//!
//! [`Scheduler`] runs callbacks at a given time, optionally repeating on a fixed period. It
//! knows nothing about what the callbacks do, which makes it a building block for any
//! background maintenance: cache refreshes, cleanup sweeps, heartbeats.
//!
//! # How It Works
//!
//! - Tasks are kept in a binary min-heap ordered by due time plus an index keyed by task id.
//! - A single control loop sleeps until the earliest live task is due, or until a new task is
//!   added, or until [`Scheduler::stop`] is called.
//! - Due callbacks are spawned as separate tokio tasks, so a slow callback never delays the
//!   next wake-up.
//! - Removing a task only drops its index entry. The heap entry is skipped when it reaches the
//!   root, which keeps cancellation cheap.
//! - Failures and panics inside callbacks are sent to an [`ErrorSink`] and never retried. A
//!   recurring task simply fires again on its next period.
//!
//! Periods are arbitrary per task and the number of tasks is expected to stay moderate, which
//! is why a heap is used rather than a fixed-resolution timer wheel.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::time::Duration;
//!
//! use taskheap::Scheduler;
//!
//! # #[tokio::main(flavor = "current_thread", start_paused = true)]
//! # async fn main() -> Result<(), taskheap::Error> {
//! let scheduler = Scheduler::new();
//! scheduler.start()?;
//!
//! let ticks = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&ticks);
//! scheduler.add_task("tick", Duration::from_millis(100), move || {
//!     let counter = Arc::clone(&counter);
//!     async move {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!         Ok(())
//!     }
//! })?;
//!
//! tokio::time::sleep(Duration::from_millis(350)).await;
//! assert_eq!(ticks.load(Ordering::Relaxed), 3);
//!
//! scheduler.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Time
//!
//! Due times are [`tokio::time::Instant`] values, so tests can use tokio's paused clock to
//! drive the scheduler deterministically.

mod error;
mod scheduler;
mod sink;
mod state;

pub use error::{Error, Result, TaskError};
pub use scheduler::{Callback, Scheduler, SchedulerBuilder};
pub use sink::{ErrorSink, LogSink};
