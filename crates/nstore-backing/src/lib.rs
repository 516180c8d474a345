//! Transactional key-value backing stores for nstore.
//!
//! The object store never touches storage directly. It drives a
//! [`BackingStore`]: an opaque map from string keys (pids) to string values
//! (serialized records) with a begin/commit transaction bracket.
//!
//! # Backends
//!
//! - [`InMemoryBackingStore`] -- `BTreeMap`-based store for tests and embedding
//! - [`FileBackingStore`] -- single JSON file, rewritten atomically on commit
//!
//! # Design Rules
//!
//! 1. Writes happen inside a transaction. Staged writes are visible to reads
//!    through the same store before commit.
//! 2. `commit` makes every staged write visible at once; `rollback` drops them.
//! 3. The store never interprets values.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod file;
pub mod memory;
pub mod traits;
mod txn;

pub use error::{BackingError, BackingResult};
pub use file::FileBackingStore;
pub use memory::{CommitStats, InMemoryBackingStore};
pub use traits::BackingStore;
