//! The active object cache: an arena of live instances plus the pid side
//! table.
//!
//! Invariants:
//! - At most one live handle per pid (`by_pid` and `pids` mirror each other).
//! - Slots are never reused; an evicted slot stays a tombstone.
//! - A slot is `Busy` only while its object is out being encoded or decoded,
//!   and a busy object always already has its pid.

use std::collections::HashMap;

use nstore_types::Pid;

use crate::error::{StoreError, StoreResult};
use crate::storable::{ObjectHandle, Storable};

enum Slot {
    Occupied(Box<dyn Storable>),
    Busy,
    Evicted,
}

struct Entry {
    slot: Slot,
    type_name: &'static str,
    pid: Option<Pid>,
}

/// Identity map from pid to the sole live instance.
#[derive(Default)]
pub struct ActiveObjectCache {
    entries: Vec<Entry>,
    by_pid: HashMap<Pid, ObjectHandle>,
}

impl ActiveObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-evicted) objects.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !matches!(e.slot, Slot::Evicted))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live objects that currently have a pid.
    pub fn pid_count(&self) -> usize {
        self.by_pid.len()
    }

    /// Add an object without identity.
    pub fn insert(&mut self, obj: Box<dyn Storable>) -> ObjectHandle {
        let handle = ObjectHandle::new(self.entries.len());
        self.entries.push(Entry {
            type_name: obj.type_name(),
            slot: Slot::Occupied(obj),
            pid: None,
        });
        handle
    }

    /// Returns `true` if the handle names a live object.
    pub fn is_live(&self, handle: ObjectHandle) -> bool {
        self.entries
            .get(handle.index())
            .is_some_and(|e| !matches!(e.slot, Slot::Evicted))
    }

    pub fn ensure_live(&self, handle: ObjectHandle) -> StoreResult<()> {
        if self.is_live(handle) {
            Ok(())
        } else {
            Err(StoreError::StaleHandle(handle))
        }
    }

    pub fn get(&self, handle: ObjectHandle) -> StoreResult<&dyn Storable> {
        match self.entries.get(handle.index()).map(|e| &e.slot) {
            Some(Slot::Occupied(obj)) => Ok(obj.as_ref()),
            _ => Err(StoreError::StaleHandle(handle)),
        }
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> StoreResult<&mut dyn Storable> {
        match self.entries.get_mut(handle.index()).map(|e| &mut e.slot) {
            Some(Slot::Occupied(obj)) => Ok(obj.as_mut()),
            _ => Err(StoreError::StaleHandle(handle)),
        }
    }

    /// Type name recorded when the object was inserted.
    pub fn type_name(&self, handle: ObjectHandle) -> StoreResult<&'static str> {
        self.ensure_live(handle)?;
        Ok(self.entries[handle.index()].type_name)
    }

    /// Move an object out of its slot, leaving it busy.
    pub(crate) fn take(&mut self, handle: ObjectHandle) -> StoreResult<Box<dyn Storable>> {
        let entry = self
            .entries
            .get_mut(handle.index())
            .ok_or(StoreError::StaleHandle(handle))?;
        match std::mem::replace(&mut entry.slot, Slot::Busy) {
            Slot::Occupied(obj) => Ok(obj),
            other => {
                entry.slot = other;
                Err(StoreError::StaleHandle(handle))
            }
        }
    }

    /// Put back an object previously taken.
    pub(crate) fn restore(&mut self, handle: ObjectHandle, obj: Box<dyn Storable>) {
        if let Some(entry) = self.entries.get_mut(handle.index()) {
            if matches!(entry.slot, Slot::Busy) {
                entry.slot = Slot::Occupied(obj);
            }
        }
    }

    /// Drop the object and its pid mapping. The slot becomes a tombstone.
    pub fn evict(&mut self, handle: ObjectHandle) -> StoreResult<Box<dyn Storable>> {
        let entry = self
            .entries
            .get_mut(handle.index())
            .ok_or(StoreError::StaleHandle(handle))?;
        let obj = match std::mem::replace(&mut entry.slot, Slot::Evicted) {
            Slot::Occupied(obj) => obj,
            other => {
                entry.slot = other;
                return Err(StoreError::StaleHandle(handle));
            }
        };
        if let Some(pid) = entry.pid.take() {
            self.by_pid.remove(&pid);
        }
        Ok(obj)
    }

    /// Live handle for a pid.
    pub fn handle_for(&self, pid: &Pid) -> Option<ObjectHandle> {
        self.by_pid.get(pid).copied()
    }

    pub fn pid_of(&self, handle: ObjectHandle) -> Option<&Pid> {
        self.entries.get(handle.index()).and_then(|e| e.pid.as_ref())
    }

    /// Set a pid directly, without generating one and without any dirty
    /// side effect. Used when loading and for roots.
    pub fn force_set_pid(&mut self, handle: ObjectHandle, pid: Pid) -> StoreResult<()> {
        self.ensure_live(handle)?;
        if let Some(old) = self.entries[handle.index()].pid.take() {
            self.by_pid.remove(&old);
        }
        if let Some(previous) = self.by_pid.insert(pid.clone(), handle) {
            if previous != handle {
                self.entries[previous.index()].pid = None;
            }
        }
        self.entries[handle.index()].pid = Some(pid);
        Ok(())
    }

    /// Return the handle's pid, generating one if it has none.
    ///
    /// `is_taken` lets the caller veto generated pids that collide with
    /// something outside the cache. The flag is `true` when a pid was
    /// generated by this call.
    pub fn assign_pid(
        &mut self,
        handle: ObjectHandle,
        is_taken: impl Fn(&Pid) -> bool,
    ) -> StoreResult<(Pid, bool)> {
        let type_name = self.type_name(handle)?;
        if let Some(pid) = self.pid_of(handle) {
            return Ok((pid.clone(), false));
        }
        let pid = loop {
            let candidate = Pid::generate(type_name);
            if !self.by_pid.contains_key(&candidate) && !is_taken(&candidate) {
                break candidate;
            }
        };
        self.force_set_pid(handle, pid.clone())?;
        Ok((pid, true))
    }

    /// Detach a pid from its live instance, which becomes unpersisted.
    pub fn forget_pid(&mut self, pid: &Pid) -> Option<ObjectHandle> {
        let handle = self.by_pid.remove(pid)?;
        self.entries[handle.index()].pid = None;
        Some(handle)
    }

    /// Handles of every live object, in arena order.
    pub fn handles(&self) -> impl Iterator<Item = ObjectHandle> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !matches!(e.slot, Slot::Evicted))
            .map(|(i, _)| ObjectHandle::new(i))
    }
}
