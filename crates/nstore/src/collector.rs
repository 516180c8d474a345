//! Mark-sweep garbage collection over raw backing-store records.
//!
//! Marking starts from every root key and follows the edges named by each
//! record's type schema. Nothing is instantiated and the live object cache
//! is never consulted: only what has been flushed counts.

use std::collections::{HashSet, VecDeque};

use nstore_backing::BackingStore;
use nstore_types::{is_root_key, Record};
use tracing::{debug, info, warn};

use crate::codec::pid_refs_of;
use crate::error::StoreResult;
use crate::registry::TypeRegistry;

/// Outcome of a collection pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectReport {
    /// Number of keys reachable from a root.
    pub marked: usize,
    /// Keys deleted (or, for a dry run, that would be), sorted.
    pub deleted: Vec<String>,
}

/// Garbage collector bound to one backing store.
pub struct Collector<'a> {
    backing: &'a dyn BackingStore,
    registry: &'a TypeRegistry,
}

impl<'a> Collector<'a> {
    pub fn new(backing: &'a dyn BackingStore, registry: &'a TypeRegistry) -> Self {
        Self { backing, registry }
    }

    /// Keys reachable from the root keys.
    ///
    /// A referenced key with no record is still marked; it simply has no
    /// outgoing edges. Unparsable records are treated the same way.
    pub fn mark(&self) -> StoreResult<HashSet<String>> {
        let mut marked = HashSet::new();
        let mut queue: VecDeque<String> = self
            .backing
            .keys()?
            .into_iter()
            .filter(|key| is_root_key(key))
            .collect();

        while let Some(key) = queue.pop_front() {
            if !marked.insert(key.clone()) {
                continue;
            }
            let Some(raw) = self.backing.get(&key)? else {
                debug!(pid = %key, "marked pid has no record");
                continue;
            };
            let record = match Record::from_json(&raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!(pid = %key, error = %e, "skipping edges of unreadable record");
                    continue;
                }
            };
            let schema = self.registry.schema(&record.type_name);
            for pid in pid_refs_of(&record, schema) {
                if !marked.contains(&pid) {
                    queue.push_back(pid);
                }
            }
        }
        Ok(marked)
    }

    /// Keys not in `marked`, sorted.
    pub fn unreachable(&self, marked: &HashSet<String>) -> StoreResult<Vec<String>> {
        Ok(self
            .backing
            .keys()?
            .into_iter()
            .filter(|key| !marked.contains(key))
            .collect())
    }

    /// Delete every key not in `marked`, in one transaction.
    pub async fn sweep(&self, marked: &HashSet<String>) -> StoreResult<Vec<String>> {
        let garbage = self.unreachable(marked)?;
        if garbage.is_empty() {
            return Ok(garbage);
        }

        self.backing.begin()?;
        for key in &garbage {
            if let Err(e) = self.backing.delete(key) {
                self.backing.rollback()?;
                return Err(e.into());
            }
        }
        if let Err(e) = self.backing.commit().await {
            if self.backing.in_transaction() {
                self.backing.rollback()?;
            }
            return Err(e.into());
        }
        Ok(garbage)
    }

    /// Mark, then sweep.
    pub async fn collect(&self) -> StoreResult<CollectReport> {
        let marked = self.mark()?;
        let deleted = self.sweep(&marked).await?;
        info!(
            marked = marked.len(),
            deleted = deleted.len(),
            "garbage collection complete"
        );
        Ok(CollectReport {
            marked: marked.len(),
            deleted,
        })
    }

    /// Mark and report what a sweep would delete, without deleting.
    pub fn dry_run(&self) -> StoreResult<CollectReport> {
        let marked = self.mark()?;
        let deleted = self.unreachable(&marked)?;
        Ok(CollectReport {
            marked: marked.len(),
            deleted,
        })
    }
}
