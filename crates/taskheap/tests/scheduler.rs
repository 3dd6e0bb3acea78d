// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the scheduler control loop, driven by tokio's paused clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskheap::{Error, Scheduler, TaskError};
use tokio::time::{Instant, sleep};

const MS: Duration = Duration::from_millis(1);

/// Collects the ids of fired tasks, in firing order.
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<&'static str>>>);

impl Journal {
    fn recorder(&self, id: &'static str) -> impl Fn() -> std::future::Ready<Result<(), TaskError>> + Send + Sync + 'static {
        let journal = self.clone();
        move || {
            journal.0.lock().unwrap().push(id);
            std::future::ready(Ok(()))
        }
    }

    fn entries(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, id: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|entry| **entry == id).count()
    }
}

#[derive(Clone, Default)]
struct Failures(Arc<Mutex<Vec<(String, String, bool)>>>);

impl Failures {
    fn scheduler(&self) -> Scheduler {
        let failures = self.clone();
        Scheduler::builder()
            .error_sink(move |id: &str, error: &TaskError| {
                failures.0.lock().unwrap().push((id.to_owned(), error.to_string(), error.is_panic()));
            })
            .build()
    }

    fn entries(&self) -> Vec<(String, String, bool)> {
        self.0.lock().unwrap().clone()
    }
}

#[tokio::test(start_paused = true)]
async fn one_shot_fires_after_delay_and_stop_exits() {
    let scheduler = Scheduler::new();
    scheduler.start().unwrap();

    let slot: Arc<Mutex<Option<Instant>>> = Arc::default();
    let writer = Arc::clone(&slot);
    let added_at = Instant::now();
    scheduler
        .add_once_task("stamp", 50 * MS, move || {
            *writer.lock().unwrap() = Some(Instant::now());
            async { Ok(()) }
        })
        .unwrap();

    sleep(40 * MS).await;
    assert!(slot.lock().unwrap().is_none());

    sleep(20 * MS).await;
    let fired_at = slot.lock().unwrap().expect("task should have fired");
    let elapsed = fired_at - added_at;
    assert!(elapsed >= 50 * MS && elapsed < 55 * MS, "fired after {elapsed:?}");
    assert_eq!(scheduler.task_count(), 0);

    tokio::time::timeout(Duration::from_secs(1), scheduler.stop())
        .await
        .expect("control loop should exit promptly");
    assert!(!scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn earlier_task_fires_first_regardless_of_insertion_order() {
    for a_first in [true, false] {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();
        let journal = Journal::default();

        if a_first {
            scheduler.add_once_task("a", 10 * MS, journal.recorder("a")).unwrap();
            scheduler.add_once_task("b", 5 * MS, journal.recorder("b")).unwrap();
        } else {
            scheduler.add_once_task("b", 5 * MS, journal.recorder("b")).unwrap();
            scheduler.add_once_task("a", 10 * MS, journal.recorder("a")).unwrap();
        }

        sleep(20 * MS).await;
        assert_eq!(journal.entries(), ["b", "a"]);
        scheduler.stop().await;
    }
}

#[tokio::test(start_paused = true)]
async fn duplicate_registration_keeps_original_task() {
    let scheduler = Scheduler::new();
    scheduler.start().unwrap();
    let journal = Journal::default();

    scheduler.add_task("job", 10 * MS, journal.recorder("original")).unwrap();
    let error = scheduler.add_task("job", MS, journal.recorder("impostor")).unwrap_err();
    assert!(matches!(error, Error::DuplicateTask(ref id) if id == "job"));

    sleep(25 * MS).await;
    assert_eq!(journal.entries(), ["original", "original"]);
    assert_eq!(scheduler.task_count(), 1);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn removed_task_never_fires_while_others_do() {
    let scheduler = Scheduler::new();
    scheduler.start().unwrap();
    let journal = Journal::default();

    scheduler.add_once_task("cancelled", 10 * MS, journal.recorder("cancelled")).unwrap();
    scheduler.add_once_task("before", 5 * MS, journal.recorder("before")).unwrap();
    scheduler.add_once_task("after", 15 * MS, journal.recorder("after")).unwrap();

    assert!(scheduler.remove_task("cancelled"));
    assert!(!scheduler.remove_task("cancelled"));
    assert!(!scheduler.remove_task("unknown"));
    assert_eq!(scheduler.task_count(), 2);

    sleep(30 * MS).await;

    assert_eq!(journal.entries(), ["before", "after"]);
    assert_eq!(scheduler.next_task_time(), None);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn recurring_task_fires_every_period() {
    let scheduler = Scheduler::new();
    scheduler.start().unwrap();
    let journal = Journal::default();

    scheduler.add_task("tick", 10 * MS, journal.recorder("tick")).unwrap();

    sleep(55 * MS).await;
    assert_eq!(journal.count("tick"), 5);

    assert!(scheduler.remove_task("tick"));
    sleep(50 * MS).await;
    assert_eq!(journal.count("tick"), 5);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn start_time_offsets_first_firing() {
    let scheduler = Scheduler::new();
    scheduler.start().unwrap();
    let journal = Journal::default();

    let now = Instant::now();
    scheduler
        .add_task_with_start_time("staggered", now + 3 * MS, 10 * MS, journal.recorder("staggered"))
        .unwrap();
    scheduler
        .add_once_task_with_start_time("once", now + 7 * MS, journal.recorder("once"))
        .unwrap();
    assert_eq!(scheduler.next_task_time(), Some(now + 3 * MS));

    sleep(15 * MS).await;
    assert_eq!(journal.entries(), ["staggered", "once", "staggered"]);
    assert_eq!(scheduler.next_task_time(), Some(now + 23 * MS));

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn task_added_while_waiting_wakes_the_loop() {
    let scheduler = Scheduler::new();
    scheduler.start().unwrap();
    let journal = Journal::default();

    scheduler.add_once_task("slow", Duration::from_secs(60), journal.recorder("slow")).unwrap();
    sleep(MS).await;

    scheduler.add_once_task("fast", 5 * MS, journal.recorder("fast")).unwrap();
    sleep(10 * MS).await;

    assert_eq!(journal.entries(), ["fast"]);
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn due_task_fires_while_new_tasks_keep_arriving() {
    let scheduler = Scheduler::new();
    scheduler.start().unwrap();
    let journal = Journal::default();

    scheduler
        .add_once_task_with_start_time("due", Instant::now(), journal.recorder("due"))
        .unwrap();
    for i in 0..50 {
        scheduler
            .add_once_task(&format!("later-{i}"), Duration::from_secs(3600), || async { Ok(()) })
            .unwrap();
        tokio::task::yield_now().await;
    }

    assert_eq!(journal.entries(), ["due"]);
    assert_eq!(scheduler.task_count(), 50);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failures_and_panics_are_reported_and_isolated() {
    let failures = Failures::default();
    let scheduler = failures.scheduler();
    scheduler.start().unwrap();
    let journal = Journal::default();

    scheduler
        .add_task("failing", 10 * MS, || async { Err(TaskError::from_message("backend down")) })
        .unwrap();
    scheduler
        .add_once_task("panicking", 10 * MS, || async {
            panic!("callback exploded");
        })
        .unwrap();
    scheduler.add_once_task("healthy", 10 * MS, journal.recorder("healthy")).unwrap();

    sleep(25 * MS).await;

    let mut reported = failures.entries();
    reported.sort();
    assert_eq!(
        reported,
        [
            ("failing".to_owned(), "backend down".to_owned(), false),
            ("failing".to_owned(), "backend down".to_owned(), false),
            ("panicking".to_owned(), "task callback panicked: callback exploded".to_owned(), true),
        ]
    );
    assert_eq!(journal.entries(), ["healthy"]);
    assert!(scheduler.contains_task("failing"));
    assert!(scheduler.is_running());

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn panic_in_synchronous_part_of_callback_is_caught() {
    let failures = Failures::default();
    let scheduler = failures.scheduler();
    scheduler.start().unwrap();

    scheduler
        .add_once_task("eager", 5 * MS, || -> std::future::Ready<Result<(), TaskError>> {
            panic!("before the future existed");
        })
        .unwrap();

    sleep(10 * MS).await;
    let reported = failures.entries();
    assert_eq!(reported.len(), 1);
    assert!(reported[0].2);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_lets_running_callback_finish_and_prevents_new_firings() {
    let scheduler = Scheduler::new();
    scheduler.start().unwrap();

    let finished = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finished);
    scheduler
        .add_task("long", 10 * MS, move || {
            let counter = Arc::clone(&counter);
            async move {
                sleep(30 * MS).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();

    // First firing at 10ms is still sleeping when the loop stops.
    sleep(15 * MS).await;
    scheduler.stop().await;

    sleep(100 * MS).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.task_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn re_added_id_uses_new_schedule() {
    let scheduler = Scheduler::new();
    scheduler.start().unwrap();
    let journal = Journal::default();

    scheduler.add_once_task("job", 5 * MS, journal.recorder("old")).unwrap();
    assert!(scheduler.remove_task("job"));
    scheduler.add_once_task("job", 20 * MS, journal.recorder("new")).unwrap();

    sleep(10 * MS).await;
    assert!(journal.entries().is_empty());

    sleep(15 * MS).await;
    assert_eq!(journal.entries(), ["new"]);

    scheduler.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clones_share_tasks_on_multi_thread_runtime() {
    let scheduler = Scheduler::new();
    let handle = scheduler.clone();
    scheduler.start().unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    handle
        .add_once_task("shared", 20 * MS, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .unwrap();
    assert_eq!(scheduler.task_count(), 1);

    tokio::time::timeout(Duration::from_secs(5), async {
        while fired.load(Ordering::SeqCst) == 0 {
            sleep(5 * MS).await;
        }
    })
    .await
    .expect("task should fire");

    handle.stop().await;
    assert!(!scheduler.is_running());
}
