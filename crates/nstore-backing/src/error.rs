use std::path::PathBuf;

/// Errors from backing store operations.
#[derive(Debug, thiserror::Error)]
pub enum BackingError {
    /// The store has not been opened yet.
    #[error("backing store is not open")]
    NotOpen,

    /// `begin` was called while a transaction is already active.
    #[error("a transaction is already active")]
    TransactionActive,

    /// A write, `commit` or `rollback` was attempted outside a transaction.
    #[error("no active transaction")]
    NoTransaction,

    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The persisted image failed its integrity check.
    #[error("checksum mismatch in {path}: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: u32,
        computed: u32,
    },
}

/// Result alias for backing store operations.
pub type BackingResult<T> = Result<T, BackingError>;
