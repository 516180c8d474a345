use nstore_backing::BackingError;
use nstore_types::{Pid, TypeError};

use crate::storable::ObjectHandle;

/// Errors from object store operations.
///
/// Every variant except [`StoreError::CorruptReference`] is fatal for the
/// operation that raised it and is propagated to the caller. A corrupt
/// reference is caught inside lookup, logged, and handled according to the
/// configured corruption policy.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `open` was called on a store that is already open.
    #[error("object store is already open")]
    AlreadyOpen,

    /// The backing store has not been opened.
    #[error("object store is not open")]
    NotOpen,

    /// A write was attempted while the store is flagged read-only.
    #[error("attempt to write to read-only store")]
    WriteToReadOnly,

    /// The same pid was presented twice within one flush.
    #[error("attempt to double store {0}")]
    DoubleStore(Pid),

    /// Objects became dirty between the pre-collect flush and the mark phase.
    #[error("{remaining} objects were dirtied during collection")]
    ReentrantDirtyDuringCollect { remaining: usize },

    /// A record's type discriminator is not registered.
    #[error("missing type '{0}'")]
    MissingType(String),

    /// A record's type is registered for traversal only and cannot be
    /// instantiated with an identity.
    #[error("stored object of type '{0}' has no factory to assign its identity")]
    MissingIdentityHook(String),

    /// A referenced pid is absent from the backing store.
    #[error("missing pid '{0}'")]
    CorruptReference(Pid),

    /// A root pid does not start with the root sentinel.
    #[error("invalid root pid '{0}'")]
    InvalidRootPid(String),

    /// Dirty objects cannot be evicted before they are stored.
    #[error("cannot evict dirty object {0}")]
    EvictDirty(ObjectHandle),

    /// The handle names an evicted object or was never issued.
    #[error("stale object handle {0}")]
    StaleHandle(ObjectHandle),

    /// Typed access asked for the wrong concrete type.
    #[error("object {handle} is not a {expected}")]
    TypeMismatch {
        handle: ObjectHandle,
        expected: &'static str,
    },

    /// The application-level transaction API is not implemented.
    #[error("transactions not implemented yet ({0})")]
    TransactionMisuse(&'static str),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("backing store error: {0}")]
    Backing(#[from] BackingError),

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Result alias for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;
