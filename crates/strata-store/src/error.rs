/// Errors from ledger store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The requested row was not found.
    #[error("{table} row not found: {hash}")]
    NotFound { table: &'static str, hash: String },

    /// A row with this primary key already exists.
    #[error("{table} row already exists: {hash}")]
    Duplicate { table: &'static str, hash: String },

    /// A lock guarding the backend was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// Failure reported by the underlying storage engine.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
