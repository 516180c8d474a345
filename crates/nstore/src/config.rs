use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// What lookup does after finding a reference to a missing pid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionPolicy {
    /// Schedule a one-shot wipe of the whole backing store.
    #[default]
    Wipe,
    /// Keep the data; the referencing object is re-stored with the
    /// dangling edge rewritten as null.
    Detach,
}

/// Object store configuration.
///
/// Loadable from TOML; every field is optional:
///
/// ```toml
/// flush_delay_ms = 1000
/// read_only = false
/// collect_on_open = true
/// corruption_policy = "wipe"
/// event_capacity = 64
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Debounce interval between the first `mark_dirty` and the flush.
    pub flush_delay_ms: u64,
    /// Start flagged read-only.
    pub read_only: bool,
    /// Run one collection right after `open`.
    pub collect_on_open: bool,
    pub corruption_policy: CorruptionPolicy,
    /// Capacity of the store event broadcast channel.
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_delay_ms: 1000,
            read_only: false,
            collect_on_open: true,
            corruption_policy: CorruptionPolicy::Wipe,
            event_capacity: 64,
        }
    }
}

impl StoreConfig {
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}
