use std::fmt;

/// Snapshot of an open store's size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreStats {
    /// Records in the backing store.
    pub records: usize,
    /// Total bytes across all stored records.
    pub bytes: u64,
    /// Objects in the active object cache.
    pub live_objects: usize,
    /// Objects waiting to be flushed.
    pub dirty_objects: usize,
}

impl StoreStats {
    /// `"<records> objects, <size>"`.
    pub fn short(&self) -> String {
        format!("{} objects, {}", self.records, format_bytes(self.bytes))
    }
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} live, {} dirty)",
            self.short(),
            self.live_objects,
            self.dirty_objects
        )
    }
}

/// Human-readable byte count using decimal units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1000 {
        return format!("{bytes} bytes");
    }
    let mut value = bytes as f64 / 1000.0;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
