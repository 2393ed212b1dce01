//! `SQLite` storage backend.
//!
//! All entries live as `(key, value)` rows of one table with a unique index on
//! `key`. Writes run inside transactions so a replaced key is never observed
//! missing or duplicated.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::config::SqlStorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::storage::traits::{Keys, MappingStore};

/// Statements bound to one table name.
#[derive(Debug, Clone)]
struct Statements {
    create_table: String,
    create_index: String,
    select: String,
    exists: String,
    insert: String,
    delete: String,
    count: String,
    keys: String,
}

impl Statements {
    fn new(table: &str) -> Self {
        Self {
            create_table: format!("CREATE TABLE \"{table}\" (key TEXT, value TEXT)"),
            create_index: format!("CREATE UNIQUE INDEX \"{table}_key_idx\" ON \"{table}\" (key)"),
            select: format!("SELECT value FROM \"{table}\" WHERE key = ?"),
            exists: format!("SELECT 1 FROM \"{table}\" WHERE key = ? LIMIT 1"),
            insert: format!("INSERT INTO \"{table}\" (key, value) VALUES (?, ?)"),
            delete: format!("DELETE FROM \"{table}\" WHERE key = ?"),
            count: format!("SELECT COUNT(*) FROM \"{table}\""),
            keys: format!("SELECT key FROM \"{table}\""),
        }
    }
}

/// `SQLite`-backed mapping store.
#[derive(Debug, Clone)]
pub struct SqlBackend {
    /// Database connection pool
    pool: SqlitePool,
    table: String,
    sql: Statements,
}

impl SqlBackend {
    /// Open the database and create the entry table with its unique index.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if the table is already present,
    /// or a database error if the file cannot be opened.
    pub async fn create(config: &SqlStorageConfig) -> StorageResult<Self> {
        let store = Self::connect(config).await?;
        store.create_table().await?;
        info!(path = ?config.path, table = %store.table, "SQL backend created");
        Ok(store)
    }

    /// Open a database whose entry table already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TableMissing`] if the table has not been created.
    pub async fn attach(config: &SqlStorageConfig) -> StorageResult<Self> {
        let store = Self::connect(config).await?;

        let found: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ? COLLATE NOCASE",
        )
        .bind(&store.table)
        .fetch_one(&store.pool)
        .await?;

        if found == 0 {
            store.pool.close().await;
            return Err(StorageError::TableMissing(store.table));
        }

        info!(path = ?config.path, table = %store.table, "SQL backend attached");
        Ok(store)
    }

    /// Create or attach depending on `config.create_table`.
    ///
    /// # Errors
    ///
    /// See [`SqlBackend::create`] and [`SqlBackend::attach`].
    pub async fn open(config: &SqlStorageConfig) -> StorageResult<Self> {
        if config.create_table {
            Self::create(config).await
        } else {
            Self::attach(config).await
        }
    }

    /// Create a store on a private in-memory database.
    ///
    /// The database lives as long as the store's single connection.
    ///
    /// # Errors
    ///
    /// Returns an error if `table` is not a valid identifier.
    pub async fn in_memory(table: &str) -> StorageResult<Self> {
        validate_table_name(table)?;

        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            table: table.to_string(),
            sql: Statements::new(table),
        };
        store.create_table().await?;
        Ok(store)
    }

    /// Create the table and apply `entries` in order.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails or any entry cannot be written.
    pub async fn with_entries(
        config: &SqlStorageConfig,
        entries: Vec<(String, String)>,
    ) -> StorageResult<Self> {
        let store = Self::create(config).await?;
        store.update(entries).await?;
        Ok(store)
    }

    /// Name of the entry table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Close every connection.
    ///
    /// Waits for in-flight operations; any operation issued afterwards fails.
    pub async fn close(&self) {
        self.pool.close().await;
        info!(table = %self.table, "SQL backend closed");
    }

    async fn connect(config: &SqlStorageConfig) -> StorageResult<Self> {
        validate_table_name(&config.table)?;

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            table: config.table.clone(),
            sql: Statements::new(&config.table),
        })
    }

    async fn create_table(&self) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&self.sql.create_table)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_already_exists(&e) {
                    StorageError::AlreadyExists(self.table.clone())
                } else {
                    StorageError::Database(e)
                }
            })?;

        sqlx::query(&self.sql.create_index)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MappingStore for SqlBackend {
    async fn get(&self, key: &str) -> StorageResult<String> {
        validate_key(key)?;

        sqlx::query_scalar::<_, String>(&self.sql.select)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        validate_key(key)?;

        // The write comes first so the transaction takes the write lock up front
        let mut tx = self.pool.begin().await?;
        let replaced = sqlx::query(&self.sql.delete)
            .bind(key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query(&self.sql.insert)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(key, replaced = replaced > 0, "Entry written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;

        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query(&self.sql.delete)
            .bind(key)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if removed == 0 {
            tx.rollback().await?;
            return Err(StorageError::NotFound(key.to_string()));
        }

        tx.commit().await?;
        debug!(key, "Entry deleted");
        Ok(())
    }

    async fn len(&self) -> StorageResult<usize> {
        let count: i64 = sqlx::query_scalar(&self.sql.count)
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn keys(&self) -> StorageResult<Keys> {
        let keys: Vec<String> = sqlx::query_scalar(&self.sql.keys)
            .fetch_all(&self.pool)
            .await?;
        Ok(Keys::new(keys))
    }

    async fn contains(&self, key: &str) -> StorageResult<bool> {
        if key.is_empty() {
            return Ok(false);
        }

        let row: Option<i64> = sqlx::query_scalar(&self.sql.exists)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    fn backend_name(&self) -> &'static str {
        "sql"
    }
}

/// Whether `name` can be used as the entry table name.
///
/// Table names are spliced into statements, so only plain identifiers
/// (`[A-Za-z_][A-Za-z0-9_]*`) are accepted.
#[must_use]
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_table_name(name: &str) -> StorageResult<()> {
    if is_valid_table_name(name) {
        Ok(())
    } else {
        Err(StorageError::InvalidTableName(name.to_string()))
    }
}

fn is_already_exists(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.message().contains("already exists"))
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_key(key, "key is empty"));
    }
    Ok(())
}
