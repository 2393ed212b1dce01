//! Storage backend factory.
//!
//! Creates the appropriate storage backend based on configuration.

use std::sync::Arc;

use tracing::info;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageResult;
use crate::storage::file::FileBackend;
use crate::storage::sql::SqlBackend;
use crate::storage::traits::DynMappingStore;

/// Create a storage backend based on configuration.
///
/// # Arguments
///
/// * `config` - Storage configuration
///
/// # Returns
///
/// An `Arc<DynMappingStore>` pointing to the configured storage backend.
///
/// # Errors
///
/// Returns an error if the storage backend cannot be initialized.
pub async fn open_store(config: &StorageConfig) -> StorageResult<Arc<DynMappingStore>> {
    let store: Arc<DynMappingStore> = match config.backend {
        StorageBackend::File => Arc::new(FileBackend::open_with(&config.file)?),
        StorageBackend::Sql => Arc::new(SqlBackend::open(&config.sql).await?),
    };

    info!(backend = %config.backend, "Storage initialized");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileStorageConfig, SqlStorageConfig};
    use crate::error::StorageError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_file_storage() {
        let temp_dir = TempDir::new().unwrap();

        let config = StorageConfig {
            backend: StorageBackend::File,
            file: FileStorageConfig::new(temp_dir.path()),
            ..Default::default()
        };

        let storage = open_store(&config).await.unwrap();
        assert_eq!(storage.backend_name(), "file");
    }

    #[tokio::test]
    async fn test_create_sql_storage() {
        let temp_dir = TempDir::new().unwrap();

        let config = StorageConfig {
            backend: StorageBackend::Sql,
            sql: SqlStorageConfig::new(temp_dir.path().join("store.db")),
            ..Default::default()
        };

        let storage = open_store(&config).await.unwrap();
        assert_eq!(storage.backend_name(), "sql");

        // Second open must attach rather than create
        let result = open_store(&config).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));

        let mut attach = config.clone();
        attach.sql.create_table = false;
        assert!(open_store(&attach).await.is_ok());
    }
}
