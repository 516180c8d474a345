use std::collections::BTreeSet;

use crate::storable::ObjectHandle;

/// Objects whose in-memory state has diverged from the backing store.
///
/// Keyed by handle, not pid, because a dirty object may not have a pid yet.
/// Flush drains the set in waves: [`begin_wave`](Self::begin_wave) moves the
/// pending objects in flight, and anything marked while the wave is being
/// stored lands in the next one. Objects still waiting in the current wave
/// are not queued again.
#[derive(Debug, Default)]
pub struct DirtySet {
    pending: BTreeSet<ObjectHandle>,
    in_flight: BTreeSet<ObjectHandle>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an object dirty. Returns `true` if it was not already queued.
    pub fn insert(&mut self, handle: ObjectHandle) -> bool {
        if self.in_flight.contains(&handle) {
            return false;
        }
        self.pending.insert(handle)
    }

    /// Returns `true` if the object is queued or waiting in the current wave.
    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.pending.contains(&handle) || self.in_flight.contains(&handle)
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// Snapshot and clear the pending set, in arena order.
    pub fn begin_wave(&mut self) -> Vec<ObjectHandle> {
        let wave = std::mem::take(&mut self.pending);
        self.in_flight.extend(wave.iter().copied());
        wave.into_iter().collect()
    }

    /// The object has been stored.
    pub fn complete(&mut self, handle: ObjectHandle) {
        self.in_flight.remove(&handle);
    }

    /// Put objects back after a failed flush.
    pub fn restore(&mut self, handles: impl IntoIterator<Item = ObjectHandle>) {
        self.pending.extend(handles);
        let in_flight = std::mem::take(&mut self.in_flight);
        self.pending.extend(in_flight);
    }

    /// Handles currently dirty, in arena order.
    pub fn handles(&self) -> Vec<ObjectHandle> {
        self.pending.union(&self.in_flight).copied().collect()
    }
}
