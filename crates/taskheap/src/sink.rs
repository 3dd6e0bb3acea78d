// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reporting of failures that happen inside scheduled callbacks.
//!
//! Callbacks run detached from whoever registered them, so there is nobody to return an
//! error to. Every failure and every panic is handed to the scheduler's [`ErrorSink`]
//! instead and otherwise swallowed.

use crate::TaskError;

/// Receives failures raised by scheduled callbacks.
///
/// Any `Fn(&str, &TaskError)` closure is a sink, which keeps tests short:
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use taskheap::Scheduler;
///
/// let failures = Arc::new(Mutex::new(Vec::new()));
/// let seen = Arc::clone(&failures);
///
/// let scheduler = Scheduler::builder()
///     .error_sink(move |task_id: &str, error: &taskheap::TaskError| {
///         seen.lock().unwrap().push(format!("{task_id}: {error}"));
///     })
///     .build();
/// # drop(scheduler);
/// ```
pub trait ErrorSink: Send + Sync + 'static {
    /// Reports that the firing of `task_id` failed.
    fn report(&self, task_id: &str, error: &TaskError);
}

impl<F> ErrorSink for F
where
    F: Fn(&str, &TaskError) + Send + Sync + 'static,
{
    fn report(&self, task_id: &str, error: &TaskError) {
        self(task_id, error);
    }
}

/// The default sink, which emits an error-level `tracing` event per failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, task_id: &str, error: &TaskError) {
        tracing::error!(task_id, panicked = error.is_panic(), error = %error, "scheduled task failed");
    }
}
