use std::collections::BTreeMap;

use crate::error::{BackingError, BackingResult};

/// Committed entries plus the writes staged by the active transaction.
///
/// Shared by every backend: they differ only in where committed entries
/// end up.
#[derive(Debug, Default)]
pub(crate) struct Entries {
    pub(crate) open: bool,
    pub(crate) committed: BTreeMap<String, String>,
    /// `Some(v)` stages a put, `None` stages a delete.
    staged: Option<BTreeMap<String, Option<String>>>,
}

impl Entries {
    pub(crate) fn ensure_open(&self) -> BackingResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(BackingError::NotOpen)
        }
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    pub(crate) fn begin(&mut self) -> BackingResult<()> {
        self.ensure_open()?;
        if self.staged.is_some() {
            return Err(BackingError::TransactionActive);
        }
        self.staged = Some(BTreeMap::new());
        Ok(())
    }

    pub(crate) fn rollback(&mut self) -> BackingResult<()> {
        self.staged
            .take()
            .map(|_| ())
            .ok_or(BackingError::NoTransaction)
    }

    fn staged_mut(&mut self) -> BackingResult<&mut BTreeMap<String, Option<String>>> {
        self.ensure_open()?;
        self.staged.as_mut().ok_or(BackingError::NoTransaction)
    }

    pub(crate) fn put(&mut self, key: &str, value: &str) -> BackingResult<()> {
        self.staged_mut()?
            .insert(key.to_string(), Some(value.to_string()));
        Ok(())
    }

    pub(crate) fn delete(&mut self, key: &str) -> BackingResult<bool> {
        let existed = self.get(key)?.is_some();
        self.staged_mut()?.insert(key.to_string(), None);
        Ok(existed)
    }

    pub(crate) fn get(&self, key: &str) -> BackingResult<Option<String>> {
        self.ensure_open()?;
        if let Some(staged) = self.staged.as_ref() {
            if let Some(write) = staged.get(key) {
                return Ok(write.clone());
            }
        }
        Ok(self.committed.get(key).cloned())
    }

    pub(crate) fn keys(&self) -> BackingResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.view().into_keys().collect())
    }

    pub(crate) fn total_bytes(&self) -> BackingResult<u64> {
        self.ensure_open()?;
        Ok(self.view().values().map(|v| v.len() as u64).sum())
    }

    /// The committed entries with the staged writes applied on top.
    pub(crate) fn view(&self) -> BTreeMap<String, String> {
        let mut merged = self.committed.clone();
        if let Some(staged) = self.staged.as_ref() {
            apply(&mut merged, staged);
        }
        merged
    }

    /// Number of staged writes in the active transaction.
    pub(crate) fn staged_len(&self) -> BackingResult<usize> {
        self.staged
            .as_ref()
            .map(BTreeMap::len)
            .ok_or(BackingError::NoTransaction)
    }

    /// Apply and close the active transaction.
    pub(crate) fn commit(&mut self) -> BackingResult<()> {
        self.ensure_open()?;
        let staged = self.staged.take().ok_or(BackingError::NoTransaction)?;
        apply(&mut self.committed, &staged);
        Ok(())
    }
}

fn apply(target: &mut BTreeMap<String, String>, staged: &BTreeMap<String, Option<String>>) {
    for (key, write) in staged {
        match write {
            Some(value) => {
                target.insert(key.clone(), value.clone());
            }
            None => {
                target.remove(key);
            }
        }
    }
}
