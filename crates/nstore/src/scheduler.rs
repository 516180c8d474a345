//! Debounced task scheduling.
//!
//! A task key is either pending (with a deadline), running, or idle.
//! Scheduling a key that is pending or running is a no-op, so any number of
//! requests inside one delay window collapse into a single run.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tokio::time::Instant;

/// Deferred work the object store schedules for itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {
    /// Store every dirty object.
    Flush,
    /// Clear the backing store after corruption was detected.
    Wipe,
}

/// Coalescing timer table keyed by [`Task`].
#[derive(Debug, Default)]
pub struct WriteScheduler {
    pending: BTreeMap<Task, Instant>,
    running: BTreeSet<Task>,
}

impl WriteScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` to run after `delay`. Returns `false` (and changes
    /// nothing) if the task is already pending or running.
    pub fn schedule(&mut self, task: Task, delay: Duration) -> bool {
        if self.is_scheduled_or_running(task) {
            return false;
        }
        self.pending.insert(task, Instant::now() + delay);
        true
    }

    pub fn is_pending(&self, task: Task) -> bool {
        self.pending.contains_key(&task)
    }

    pub fn is_running(&self, task: Task) -> bool {
        self.running.contains(&task)
    }

    pub fn is_scheduled_or_running(&self, task: Task) -> bool {
        self.is_pending(task) || self.is_running(task)
    }

    /// Drop a pending run. Returns `true` if one was pending.
    pub fn cancel(&mut self, task: Task) -> bool {
        self.pending.remove(&task).is_some()
    }

    /// Mark `task` as running, consuming any pending run of it.
    pub fn begin(&mut self, task: Task) {
        self.pending.remove(&task);
        self.running.insert(task);
    }

    pub fn finish(&mut self, task: Task) {
        self.running.remove(&task);
    }

    /// The pending task with the earliest deadline.
    pub fn next_due(&self) -> Option<(Task, Instant)> {
        self.pending
            .iter()
            .min_by_key(|(_, at)| **at)
            .map(|(task, at)| (*task, *at))
    }

    /// Pending tasks whose deadline is at or before `now`, earliest first.
    pub fn due(&self, now: Instant) -> Vec<Task> {
        let mut due: Vec<(Task, Instant)> = self
            .pending
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(task, at)| (*task, *at))
            .collect();
        due.sort_by_key(|(_, at)| *at);
        due.into_iter().map(|(task, _)| task).collect()
    }
}
