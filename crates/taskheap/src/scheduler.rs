// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::state::{Firing, TaskSet};
use crate::{Error, ErrorSink, LogSink, Result, TaskError};

/// The type-erased form in which callbacks are stored.
pub type Callback = Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<(), TaskError>> + Send + Sync>;

/// Runs named callbacks at a given time, once or on a fixed period.
///
/// Tasks live in a min-heap ordered by due time, next to an index keyed by task id. A single
/// control loop, started with [`start`](Self::start), sleeps until the earliest live task is
/// due, pops every due task and spawns its callback as an independent tokio task. Scheduling
/// therefore never waits for a callback to finish.
///
/// `Scheduler` is a cheap handle; clones share the same tasks and control loop.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use taskheap::Scheduler;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), taskheap::Error> {
/// let scheduler = Scheduler::new();
/// scheduler.start()?;
///
/// scheduler.add_task("heartbeat", Duration::from_secs(30), || async {
///     // periodic work
///     Ok(())
/// })?;
/// scheduler.add_once_task("warmup", Duration::from_millis(10), || async { Ok(()) })?;
/// assert_eq!(scheduler.task_count(), 2);
///
/// assert!(scheduler.remove_task("heartbeat"));
/// scheduler.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

struct Shared {
    name: Cow<'static, str>,
    tasks: Mutex<TaskSet>,
    wake: Notify,
    sink: Arc<dyn ErrorSink>,
    control: Mutex<Option<Control>>,
}

/// Handles of a running control loop.
struct Control {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.shared.name)
            .field("tasks", &self.task_count())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Creates a scheduler that reports callback failures through [`LogSink`].
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a builder for configuring a scheduler.
    #[must_use]
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// The name used in log events emitted by this scheduler.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Schedules a recurring task whose first firing is one `period` from now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateTask`] if a live task with the same id exists.
    pub fn add_task<F, Fut>(&self, id: &str, period: Duration, callback: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), TaskError>> + Send + 'static,
    {
        self.add_task_with_start_time(id, Instant::now() + period, period, callback)
    }

    /// Schedules a recurring task whose first firing is at `start`.
    ///
    /// A zero `period` makes the task one-shot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateTask`] if a live task with the same id exists.
    pub fn add_task_with_start_time<F, Fut>(&self, id: &str, start: Instant, period: Duration, callback: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), TaskError>> + Send + 'static,
    {
        let callback: Callback = Arc::new(move || callback().boxed());
        self.shared.tasks.lock().insert(id, start, period, callback)?;

        tracing::debug!(scheduler = %self.shared.name, task_id = id, ?period, "task scheduled");
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Schedules a task that fires once, `delay` from now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateTask`] if a live task with the same id exists.
    pub fn add_once_task<F, Fut>(&self, id: &str, delay: Duration, callback: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), TaskError>> + Send + 'static,
    {
        self.add_once_task_with_start_time(id, Instant::now() + delay, callback)
    }

    /// Schedules a task that fires once at `start`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateTask`] if a live task with the same id exists.
    pub fn add_once_task_with_start_time<F, Fut>(&self, id: &str, start: Instant, callback: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), TaskError>> + Send + 'static,
    {
        self.add_task_with_start_time(id, start, Duration::ZERO, callback)
    }

    /// Cancels a task. Returns `false` if no live task has this id.
    ///
    /// The task is forgotten immediately; its heap slot is reclaimed when the control loop
    /// reaches it. A firing that already started is not interrupted.
    pub fn remove_task(&self, id: &str) -> bool {
        let removed = self.shared.tasks.lock().remove(id);
        if removed {
            tracing::debug!(scheduler = %self.shared.name, task_id = id, "task removed");
        }
        removed
    }

    /// Returns `true` if a live task with this id is scheduled.
    #[must_use]
    pub fn contains_task(&self, id: &str) -> bool {
        self.shared.tasks.lock().contains(id)
    }

    /// The number of live tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.shared.tasks.lock().len()
    }

    /// The due time of the next live task, if any.
    #[must_use]
    pub fn next_task_time(&self) -> Option<Instant> {
        self.shared.tasks.lock().next_due()
    }

    /// Returns `true` while the control loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.control.lock().is_some()
    }

    /// Spawns the control loop on the current tokio runtime.
    ///
    /// Tasks may be added before or after starting; nothing fires until the loop runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] outside a tokio runtime and [`Error::AlreadyRunning`] if
    /// the loop was started before and not stopped since.
    pub fn start(&self) -> Result<()> {
        let mut control = self.shared.control.lock();
        if control.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = runtime.spawn(run(Arc::clone(&self.shared), shutdown_rx));
        *control = Some(Control { shutdown, handle });

        tracing::debug!(scheduler = %self.shared.name, "scheduler started");
        Ok(())
    }

    /// Stops the control loop and waits for it to exit.
    ///
    /// Callbacks that are already running finish on their own; no new firing starts once the
    /// loop has observed the shutdown. Does nothing if the loop is not running.
    pub async fn stop(&self) {
        let Some(control) = self.shared.control.lock().take() else {
            return;
        };

        // The loop may already be gone, in which case the send fails and there is nothing to signal.
        _ = control.shutdown.send(());
        if let Err(error) = control.handle.await {
            tracing::warn!(scheduler = %self.shared.name, %error, "scheduler loop ended abnormally");
        }

        tracing::debug!(scheduler = %self.shared.name, "scheduler stopped");
    }
}

/// The control loop. The only place that pops the heap.
async fn run(shared: Arc<Shared>, mut shutdown: oneshot::Receiver<()>) {
    loop {
        let next = shared.tasks.lock().prune();

        let timer = async {
            match next {
                Some(due) => tokio::time::sleep_until(due).await,
                None => std::future::pending().await,
            }
        };

        // Due tasks fire after a wake-up too.
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            () = shared.wake.notified() => {}
            () = timer => {}
        }

        let firings = shared.tasks.lock().pop_due(Instant::now());
        for firing in firings {
            tokio::spawn(fire(Arc::clone(&shared), firing));
        }
    }
}

/// Runs one callback, converting a panic into a [`TaskError`] so it cannot escape.
async fn fire(shared: Arc<Shared>, firing: Firing) {
    let Firing { id, callback } = firing;
    tracing::trace!(scheduler = %shared.name, task_id = &*id, "task firing");

    let outcome = AssertUnwindSafe(async move { callback().await }).catch_unwind().await;
    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(error)) => error,
        Err(payload) => TaskError::from_panic(payload.as_ref()),
    };

    shared.sink.report(&id, &error);
}

/// Builder for configuring a [`Scheduler`].
///
/// # Examples
///
/// ```
/// use taskheap::{LogSink, Scheduler};
///
/// let scheduler = Scheduler::builder()
///     .name("cache-refresh")
///     .error_sink(LogSink)
///     .build();
/// assert_eq!(scheduler.name(), "cache-refresh");
/// ```
#[must_use]
pub struct SchedulerBuilder {
    name: Cow<'static, str>,
    sink: Arc<dyn ErrorSink>,
}

impl Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerBuilder").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    /// Creates a builder named `"scheduler"` that reports to [`LogSink`].
    pub fn new() -> Self {
        Self {
            name: Cow::Borrowed("scheduler"),
            sink: Arc::new(LogSink),
        }
    }

    /// Sets the name attached to log events.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets where callback failures and panics are reported.
    pub fn error_sink(mut self, sink: impl ErrorSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Builds the scheduler. The control loop is not started.
    pub fn build(self) -> Scheduler {
        Scheduler {
            shared: Arc::new(Shared {
                name: self.name,
                tasks: Mutex::new(TaskSet::default()),
                wake: Notify::new(),
                sink: self.sink,
                control: Mutex::new(None),
            }),
        }
    }
}
