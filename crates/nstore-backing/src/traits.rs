use async_trait::async_trait;

use crate::error::BackingResult;

/// Transactional string key-value store.
///
/// All implementations must satisfy these invariants:
/// - `put` and `delete` are only legal between `begin` and `commit`/`rollback`.
/// - Reads (`get`, `has_key`, `keys`, `size`) observe staged writes of the
///   active transaction.
/// - `commit` applies every staged write at once or, on error, none of them.
/// - Only `open` and `commit` (and the self-committing `clear`) may suspend.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Open the store, loading any persisted state.
    async fn open(&self) -> BackingResult<()>;

    /// Returns `true` once `open` has completed.
    fn is_open(&self) -> bool;

    /// Start a transaction.
    fn begin(&self) -> BackingResult<()>;

    /// Apply every write staged since `begin`.
    async fn commit(&self) -> BackingResult<()>;

    /// Drop every write staged since `begin`.
    fn rollback(&self) -> BackingResult<()>;

    /// Returns `true` while a transaction is active.
    fn in_transaction(&self) -> bool;

    /// Stage a write of `value` under `key`.
    fn put(&self, key: &str, value: &str) -> BackingResult<()>;

    /// Read the value under `key`. Returns `Ok(None)` if absent.
    fn get(&self, key: &str) -> BackingResult<Option<String>>;

    /// Check whether `key` exists.
    fn has_key(&self, key: &str) -> BackingResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Stage a deletion of `key`. Returns `true` if the key existed.
    fn delete(&self, key: &str) -> BackingResult<bool>;

    /// All keys, sorted.
    fn keys(&self) -> BackingResult<Vec<String>>;

    /// Number of keys.
    fn size(&self) -> BackingResult<usize> {
        Ok(self.keys()?.len())
    }

    /// Total bytes across all stored values.
    fn total_bytes(&self) -> BackingResult<u64>;

    /// Remove every key. Runs as its own transaction and fails if one is active.
    async fn clear(&self) -> BackingResult<()>;
}
