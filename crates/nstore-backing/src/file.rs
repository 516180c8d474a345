//! Single-file backing store.
//!
//! On-disk format (JSON):
//! ```text
//! {
//!   "checksum": <CRC32 of the serialized entries map>,
//!   "entries": { "<key>": "<value>", ... }
//! }
//! ```
//!
//! Every commit rewrites the whole image to a sibling temp file and renames
//! it over the original, so a crash leaves either the old or the new image.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BackingError, BackingResult};
use crate::traits::BackingStore;
use crate::txn::Entries;

#[derive(Serialize, Deserialize)]
struct FileImage {
    checksum: u32,
    entries: BTreeMap<String, String>,
}

fn checksum_of(entries: &BTreeMap<String, String>) -> BackingResult<u32> {
    let bytes =
        serde_json::to_vec(entries).map_err(|e| BackingError::Serialization(e.to_string()))?;
    Ok(crc32fast::hash(&bytes))
}

/// Backing store persisted as one JSON file.
pub struct FileBackingStore {
    path: PathBuf,
    entries: RwLock<Entries>,
}

impl FileBackingStore {
    /// Create a closed store backed by the file at `path`. The file is
    /// created on the first commit if it does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> BackingResult<BTreeMap<String, String>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no backing file yet");
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(e.into()),
        };
        let image: FileImage =
            serde_json::from_str(&text).map_err(|e| BackingError::Serialization(e.to_string()))?;
        let computed = checksum_of(&image.entries)?;
        if computed != image.checksum {
            return Err(BackingError::ChecksumMismatch {
                path: self.path.clone(),
                expected: image.checksum,
                computed,
            });
        }
        Ok(image.entries)
    }

    async fn write_image(&self, entries: BTreeMap<String, String>) -> BackingResult<()> {
        let image = FileImage {
            checksum: checksum_of(&entries)?,
            entries,
        };
        let bytes =
            serde_json::to_vec(&image).map_err(|e| BackingError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "wrote backing file");
        Ok(())
    }
}

#[async_trait]
impl BackingStore for FileBackingStore {
    async fn open(&self) -> BackingResult<()> {
        let loaded = self.load().await?;
        let count = loaded.len();
        {
            let mut entries = self.entries.write().expect("lock poisoned");
            entries.committed = loaded;
            entries.open = true;
        }
        info!(path = %self.path.display(), entries = count, "opened backing file");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.entries.read().expect("lock poisoned").open
    }

    fn begin(&self) -> BackingResult<()> {
        self.entries.write().expect("lock poisoned").begin()
    }

    async fn commit(&self) -> BackingResult<()> {
        // Write the merged image first; the in-memory view only moves once
        // the file is in place.
        let merged = {
            let entries = self.entries.read().expect("lock poisoned");
            entries.ensure_open()?;
            if !entries.in_transaction() {
                return Err(BackingError::NoTransaction);
            }
            entries.view()
        };
        self.write_image(merged).await?;
        self.entries.write().expect("lock poisoned").commit()
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
        {
            let entries = self.entries.read().expect("lock poisoned");
            entries.ensure_open()?;
            if entries.in_transaction() {
                return Err(BackingError::TransactionActive);
            }
        }
        self.write_image(BTreeMap::new()).await?;
        self.entries.write().expect("lock poisoned").committed.clear();
        Ok(())
    }
}

impl std::fmt::Debug for FileBackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().expect("lock poisoned");
        f.debug_struct("FileBackingStore")
            .field("path", &self.path)
            .field("open", &entries.open)
            .field("entry_count", &entries.committed.len())
            .finish()
    }
}
