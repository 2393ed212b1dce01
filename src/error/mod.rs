//! Error handling module.
//!
//! Every mapping operation reports failures through [`StorageError`]. Absence of
//! a key is the only expected failure; everything else carries its original
//! cause so callers can tell "missing" from "broken".

/// Storage-specific error type.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The key has no entry in the store.
    #[error("Key not found: {0}")]
    NotFound(String),

    /// The backing table already exists.
    #[error("Table already exists: {0}")]
    AlreadyExists(String),

    /// The backing table does not exist.
    #[error("Table does not exist: {0}")]
    TableMissing(String),

    /// The key cannot be stored by this backend.
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey {
        /// Offending key.
        key: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The table name is not a plain SQL identifier.
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    /// Lock acquisition failed.
    #[error("Failed to acquire lock: {0}")]
    LockFailed(String),

    /// Lock timeout.
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File I/O error other than absence.
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    /// Build an [`StorageError::InvalidKey`].
    #[must_use]
    pub fn invalid_key(key: &str, reason: &'static str) -> Self {
        Self::InvalidKey {
            key: key.to_string(),
            reason,
        }
    }

    /// Whether this error reports a missing key.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using `StorageError`.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
