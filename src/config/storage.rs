//! Storage configuration.

use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;

use crate::storage::sql::is_valid_table_name;

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One file per key inside a directory.
    #[default]
    File,
    /// One row per key inside an `SQLite` table.
    Sql,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Sql => write!(f, "sql"),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Storage backend type.
    #[serde(default)]
    pub backend: StorageBackend,

    /// File backend configuration.
    #[serde(default)]
    pub file: FileStorageConfig,

    /// SQL backend configuration.
    #[serde(default)]
    pub sql: SqlStorageConfig,
}

impl StorageConfig {
    /// Validate the storage configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration fields are missing for the selected backend.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            StorageBackend::File => {
                if self.file.root.as_os_str().is_empty() {
                    return Err(ConfigError::Message(
                        "storage.file.root cannot be empty".to_string(),
                    ));
                }
                if self.file.lock_retry_ms == 0 {
                    return Err(ConfigError::Message(
                        "storage.file.lock_retry_ms cannot be 0".to_string(),
                    ));
                }
                Ok(())
            }
            StorageBackend::Sql => {
                if self.sql.path.as_os_str().is_empty() {
                    return Err(ConfigError::Message(
                        "storage.sql.path cannot be empty".to_string(),
                    ));
                }
                if !is_valid_table_name(&self.sql.table) {
                    return Err(ConfigError::Message(format!(
                        "storage.sql.table '{}' is not a valid identifier",
                        self.sql.table
                    )));
                }
                if self.sql.max_connections == 0 {
                    return Err(ConfigError::Message(
                        "storage.sql.max_connections cannot be 0".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// File backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FileStorageConfig {
    /// Directory holding one file per key.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Give up acquiring a key lock after this many milliseconds (0 = wait forever).
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Delay between lock acquisition attempts in milliseconds.
    #[serde(default = "default_lock_retry_ms")]
    pub lock_retry_ms: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from("./data")
}

const fn default_lock_timeout_ms() -> u64 {
    10_000
}

const fn default_lock_retry_ms() -> u64 {
    10
}

impl FileStorageConfig {
    /// File backend configuration rooted at `root` with default lock timings.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Lock acquisition deadline, `None` when waiting indefinitely.
    #[must_use]
    pub const fn lock_timeout(&self) -> Option<Duration> {
        if self.lock_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.lock_timeout_ms))
        }
    }

    /// Delay between lock attempts.
    #[must_use]
    pub const fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms)
    }
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_retry_ms: default_lock_retry_ms(),
        }
    }
}

/// SQL backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqlStorageConfig {
    /// `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Table holding the entries.
    #[serde(default = "default_table")]
    pub table: String,

    /// Create the table on open (fails if it exists) instead of attaching to it.
    #[serde(default = "default_create_table")]
    pub create_table: bool,

    /// Connection pool maximum size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits on a locked database, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data.db")
}

fn default_table() -> String {
    "Dict".to_string()
}

const fn default_create_table() -> bool {
    true
}

const fn default_max_connections() -> u32 {
    4
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl SqlStorageConfig {
    /// SQL backend configuration for `path` with the default table.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Use `table` instead of the default table name.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Busy timeout as a duration.
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for SqlStorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            table: default_table(),
            create_table: true,
            max_connections: 4,
            busy_timeout_ms: 5_000,
        }
    }
}
