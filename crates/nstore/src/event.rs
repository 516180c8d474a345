use tokio::sync::broadcast;

/// Notifications emitted by an [`ObjectStore`](crate::ObjectStore).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    /// `open` finished, including its collection pass.
    Opened { collected: usize },
    /// A flush committed `stored` records.
    Flushed { stored: usize },
    /// A collection deleted `deleted` records.
    Collected { deleted: usize },
    /// Corruption recovery cleared the backing store.
    Wiped,
}

/// A broadcast receiver for store events.
pub type EventStream = broadcast::Receiver<StoreEvent>;
