use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::error::BackingResult;
use crate::traits::BackingStore;
use crate::txn::Entries;

/// Counters describing the commits an [`InMemoryBackingStore`] has applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Number of successful commits.
    pub commits: u64,
    /// Number of staged writes (puts and deletes) in the last commit.
    pub last_batch: usize,
}

/// In-memory, `BTreeMap`-based backing store.
///
/// Intended for tests and embedding. All entries are held behind a `RwLock`
/// so one store can be shared by several object stores through an `Arc`.
/// Data is lost when the store is dropped.
pub struct InMemoryBackingStore {
    entries: RwLock<Entries>,
    stats: RwLock<CommitStats>,
}

impl InMemoryBackingStore {
    /// Create a new empty (closed) store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            stats: RwLock::new(CommitStats::default()),
        }
    }

    /// Create a closed store pre-populated with committed entries.
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        {
            let mut guard = store.entries.write().expect("lock poisoned");
            guard
                .committed
                .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        }
        store
    }

    /// Commit counters.
    pub fn commit_stats(&self) -> CommitStats {
        *self.stats.read().expect("lock poisoned")
    }

    /// Committed value under `key`, ignoring any staged writes.
    pub fn committed_value(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .expect("lock poisoned")
            .committed
            .get(key)
            .cloned()
    }
}

impl Default for InMemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackingStore for InMemoryBackingStore {
    async fn open(&self) -> BackingResult<()> {
        self.entries.write().expect("lock poisoned").open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.entries.read().expect("lock poisoned").open
    }

    fn begin(&self) -> BackingResult<()> {
        self.entries.write().expect("lock poisoned").begin()
    }

    async fn commit(&self) -> BackingResult<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        let batch = entries.staged_len()?;
        entries.commit()?;
        let mut stats = self.stats.write().expect("lock poisoned");
        stats.commits += 1;
        stats.last_batch = batch;
        debug!(batch, "in-memory commit");
        Ok(())
    }

    fn rollback(&self) -> BackingResult<()> {
        self.entries.write().expect("lock poisoned").rollback()
    }

    fn in_transaction(&self) -> bool {
        self.entries.read().expect("lock poisoned").in_transaction()
    }

    fn put(&self, key: &str, value: &str) -> BackingResult<()> {
        self.entries.write().expect("lock poisoned").put(key, value)
    }

    fn get(&self, key: &str) -> BackingResult<Option<String>> {
        self.entries.read().expect("lock poisoned").get(key)
    }

    fn delete(&self, key: &str) -> BackingResult<bool> {
        self.entries.write().expect("lock poisoned").delete(key)
    }

    fn keys(&self) -> BackingResult<Vec<String>> {
        self.entries.read().expect("lock poisoned").keys()
    }

    fn total_bytes(&self) -> BackingResult<u64> {
        self.entries.read().expect("lock poisoned").total_bytes()
    }

    async fn clear(&self) -> BackingResult<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        entries.begin()?;
        entries.rollback()?;
        entries.committed.clear();
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryBackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().expect("lock poisoned");
        f.debug_struct("InMemoryBackingStore")
            .field("open", &entries.open)
            .field("entry_count", &entries.committed.len())
            .field("in_transaction", &entries.in_transaction())
            .finish()
    }
}
