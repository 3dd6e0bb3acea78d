// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for task registration and task execution.

use std::any::Any;

/// The result for fallible scheduler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An error returned synchronously by [`Scheduler`][crate::Scheduler] operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A live task with the same id is already registered.
    ///
    /// The existing task keeps its schedule and callback. Remove it first to change it.
    #[error("a task with id '{0}' is already scheduled")]
    DuplicateTask(String),

    /// The control loop was started outside of a tokio runtime.
    #[error("the scheduler must be started from within a tokio runtime")]
    NoRuntime,

    /// The control loop is already running.
    #[error("the scheduler is already running")]
    AlreadyRunning,
}

/// A failure raised by a scheduled callback.
///
/// Callbacks return this type to signal failure. The scheduler also produces it when a
/// callback panics, so that both cases reach the [`ErrorSink`][crate::ErrorSink] the same way.
///
/// # Examples
///
/// ```
/// use taskheap::TaskError;
///
/// let error = TaskError::from_message("upstream timed out");
/// assert!(!error.is_panic());
/// assert_eq!(error.to_string(), "upstream timed out");
/// ```
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct TaskError(TaskErrorKind);

#[derive(Debug, thiserror::Error)]
enum TaskErrorKind {
    #[error(transparent)]
    Failed(Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("task callback panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Wraps an error produced by a callback.
    pub fn from_source(error: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self(TaskErrorKind::Failed(error.into()))
    }

    /// Creates an error from a plain message.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::from_source(message.into())
    }

    /// Converts a panic payload captured at a firing boundary.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self(TaskErrorKind::Panicked(message))
    }

    /// Returns `true` if the callback panicked rather than returning an error.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self.0, TaskErrorKind::Panicked(_))
    }
}
