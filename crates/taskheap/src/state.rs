// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::{Callback, Error, Result};

/// A live task as seen by the index.
struct Task {
    due: Instant,
    period: Duration,
    callback: Callback,

    /// Matches the heap entry that currently represents this task. Any other heap entry
    /// carrying the same id is stale.
    generation: u64,
}

/// Heap entry ordered so that [`BinaryHeap`] behaves as a min-heap on `due`.
///
/// Entries are never removed from the middle of the heap. A removed task simply loses its
/// index entry, and the heap entry is discarded once it surfaces at the root.
struct Scheduled {
    due: Instant,

    /// Insertion order, breaks ties between entries with the same due time.
    sequence: u64,
    generation: u64,
    id: Arc<str>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: the earliest due time is the greatest element.
        other.due.cmp(&self.due).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// A callback popped from the heap that is ready to run.
pub(crate) struct Firing {
    pub(crate) id: Arc<str>,
    pub(crate) callback: Callback,
}

/// The heap plus index pair. Always accessed under the scheduler's mutex.
#[derive(Default)]
pub(crate) struct TaskSet {
    tasks: HashMap<Arc<str>, Task>,
    heap: BinaryHeap<Scheduled>,
    sequence: u64,
    generation: u64,
}

impl TaskSet {
    pub fn insert(&mut self, id: &str, due: Instant, period: Duration, callback: Callback) -> Result<()> {
        let id: Arc<str> = Arc::from(id);
        let generation = self.next_generation();

        match self.tasks.entry(Arc::clone(&id)) {
            Entry::Occupied(_) => return Err(Error::DuplicateTask(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Task {
                    due,
                    period,
                    callback,
                    generation,
                });
            }
        }

        self.push(id, due, generation);
        Ok(())
    }

    /// Drops the index entry. The heap entry stays behind until it is popped.
    pub fn remove(&mut self, id: &str) -> bool {
        self.tasks.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Number of heap entries, including stale ones.
    #[cfg(test)]
    fn heap_len(&self) -> usize {
        self.heap.len()
    }

    /// Earliest due time among live tasks, answered from the index so the heap is left alone.
    pub fn next_due(&self) -> Option<Instant> {
        self.tasks.values().map(|task| task.due).min()
    }

    /// Discards stale entries sitting at the root and returns the due time of the first live one.
    pub fn prune(&mut self) -> Option<Instant> {
        while let Some(top) = self.heap.peek() {
            if self.is_live(top) {
                return Some(top.due);
            }
            self.heap.pop();
        }
        None
    }

    /// Pops everything due at or before `now`.
    ///
    /// One-shot tasks leave the index. Recurring tasks are pushed back with their due time
    /// advanced by one period. If that is still not in the future the firing was late, and the
    /// task is rescheduled one period from `now` instead of catching up with a burst.
    pub fn pop_due(&mut self, now: Instant) -> Vec<Firing> {
        let mut firings = Vec::new();

        while self.heap.peek().is_some_and(|top| top.due <= now) {
            let Some(entry) = self.heap.pop() else { break };
            let Some(task) = self.tasks.get_mut(&entry.id) else { continue };
            if task.generation != entry.generation {
                continue;
            }

            firings.push(Firing {
                id: Arc::clone(&entry.id),
                callback: Arc::clone(&task.callback),
            });

            if task.period.is_zero() {
                self.tasks.remove(&entry.id);
                continue;
            }

            let mut next = entry.due + task.period;
            if next <= now {
                next = now + task.period;
            }
            task.due = next;
            let generation = task.generation;
            self.push(entry.id, next, generation);
        }

        firings
    }

    fn is_live(&self, entry: &Scheduled) -> bool {
        self.tasks.get(&entry.id).is_some_and(|task| task.generation == entry.generation)
    }

    fn push(&mut self, id: Arc<str>, due: Instant, generation: u64) {
        self.sequence = self.sequence.wrapping_add(1);
        self.heap.push(Scheduled {
            due,
            sequence: self.sequence,
            generation,
            id,
        });
    }

    fn next_generation(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;
    use crate::TaskError;

    fn noop() -> Callback {
        Arc::new(|| async { Ok::<(), TaskError>(()) }.boxed())
    }

    fn ids(firings: &[Firing]) -> Vec<&str> {
        firings.iter().map(|f| &*f.id).collect()
    }

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn duplicate_id_rejected() {
        let mut set = TaskSet::default();
        let now = Instant::now();

        set.insert("a", now + 10 * MS, Duration::ZERO, noop()).unwrap();
        let error = set.insert("a", now + MS, Duration::ZERO, noop()).unwrap_err();

        assert!(matches!(error, Error::DuplicateTask(id) if id == "a"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.next_due(), Some(now + 10 * MS));
        assert_eq!(set.heap_len(), 1);
    }

    #[test]
    fn pops_in_due_order() {
        let mut set = TaskSet::default();
        let now = Instant::now();

        set.insert("late", now + 10 * MS, Duration::ZERO, noop()).unwrap();
        set.insert("early", now + 5 * MS, Duration::ZERO, noop()).unwrap();
        set.insert("middle", now + 7 * MS, Duration::ZERO, noop()).unwrap();

        let firings = set.pop_due(now + 20 * MS);
        assert_eq!(ids(&firings), ["early", "middle", "late"]);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn nothing_due_yet() {
        let mut set = TaskSet::default();
        let now = Instant::now();
        set.insert("a", now + 10 * MS, Duration::ZERO, noop()).unwrap();

        assert!(set.pop_due(now + 9 * MS).is_empty());
        assert_eq!(ids(&set.pop_due(now + 10 * MS)), ["a"]);
    }

    #[test]
    fn removed_task_is_skipped_lazily() {
        let mut set = TaskSet::default();
        let now = Instant::now();
        set.insert("gone", now + 5 * MS, Duration::ZERO, noop()).unwrap();
        set.insert("kept", now + 10 * MS, Duration::ZERO, noop()).unwrap();

        assert!(set.remove("gone"));
        assert!(!set.remove("gone"));

        assert_eq!(set.len(), 1);
        assert_eq!(set.heap_len(), 2);
        assert_eq!(set.next_due(), Some(now + 10 * MS));

        assert_eq!(ids(&set.pop_due(now + 20 * MS)), ["kept"]);
        assert_eq!(set.heap_len(), 0);
    }

    #[test]
    fn prune_discards_stale_root() {
        let mut set = TaskSet::default();
        let now = Instant::now();
        set.insert("gone", now + MS, Duration::ZERO, noop()).unwrap();
        set.insert("kept", now + 2 * MS, Duration::ZERO, noop()).unwrap();
        set.remove("gone");

        assert_eq!(set.prune(), Some(now + 2 * MS));
        assert_eq!(set.heap_len(), 1);

        set.remove("kept");
        assert_eq!(set.prune(), None);
        assert_eq!(set.heap_len(), 0);
    }

    #[test]
    fn re_added_id_ignores_old_heap_entry() {
        let mut set = TaskSet::default();
        let now = Instant::now();
        set.insert("a", now + MS, Duration::ZERO, noop()).unwrap();
        set.remove("a");
        set.insert("a", now + 10 * MS, Duration::ZERO, noop()).unwrap();

        assert!(set.pop_due(now + 5 * MS).is_empty());
        assert!(set.contains("a"));
        assert_eq!(ids(&set.pop_due(now + 10 * MS)), ["a"]);
    }

    #[test]
    fn recurring_task_advances_by_period() {
        let mut set = TaskSet::default();
        let now = Instant::now();
        set.insert("tick", now + 10 * MS, 10 * MS, noop()).unwrap();

        assert_eq!(set.pop_due(now + 10 * MS).len(), 1);
        assert_eq!(set.next_due(), Some(now + 20 * MS));
        assert_eq!(set.len(), 1);

        assert_eq!(set.pop_due(now + 21 * MS).len(), 1);
        assert_eq!(set.next_due(), Some(now + 30 * MS));
    }

    #[test]
    fn late_recurring_task_does_not_burst() {
        let mut set = TaskSet::default();
        let now = Instant::now();
        set.insert("tick", now + 10 * MS, 10 * MS, noop()).unwrap();

        // Five periods late: fire once and restart the cadence from `now`.
        let late = now + 60 * MS;
        assert_eq!(set.pop_due(late).len(), 1);
        assert_eq!(set.next_due(), Some(late + 10 * MS));
    }

    #[test]
    fn removing_recurring_task_stops_it() {
        let mut set = TaskSet::default();
        let now = Instant::now();
        set.insert("tick", now + MS, MS, noop()).unwrap();
        assert_eq!(set.pop_due(now + MS).len(), 1);

        set.remove("tick");
        assert!(set.pop_due(now + 100 * MS).is_empty());
        assert_eq!(set.next_due(), None);
    }
}
