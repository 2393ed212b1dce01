//! Storage trait definitions.
//!
//! [`MappingStore`] is the mapping contract every backend implements, so callers
//! can swap persistence strategy without changing call sites.

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

/// Persistent string-to-string mapping.
///
/// Handles are cheap to share behind an `Arc`; all state lives in the backing
/// directory or database, never in process memory.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Get the value stored for `key`.
    ///
    /// Fails with [`StorageError::NotFound`] if the key is absent.
    async fn get(&self, key: &str) -> StorageResult<String>;

    /// Create or fully replace the entry for `key`.
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove the entry for `key`.
    ///
    /// Fails with [`StorageError::NotFound`] if the key is absent.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Number of stored keys.
    async fn len(&self) -> StorageResult<usize>;

    /// Snapshot of all keys, taken by a single backend scan.
    ///
    /// Order is backend-defined.
    async fn keys(&self) -> StorageResult<Keys>;

    /// Get the storage backend name.
    fn backend_name(&self) -> &'static str;

    /// Whether a subsequent `get` would succeed.
    async fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get_opt(key).await?.is_some())
    }

    /// Whether the store holds no keys.
    async fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Like [`MappingStore::get`], mapping absence to `None`.
    async fn get_opt(&self, key: &str) -> StorageResult<Option<String>> {
        match self.get(key).await {
            Ok(value) => Ok(Some(value)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Apply `set` for each pair, in order.
    async fn update(&self, entries: Vec<(String, String)>) -> StorageResult<()> {
        for (key, value) in entries {
            self.set(&key, &value).await?;
        }
        Ok(())
    }

    /// Remove `key` and return the value it held.
    async fn pop(&self, key: &str) -> StorageResult<String> {
        let value = self.get(key).await?;
        self.delete(key).await?;
        Ok(value)
    }

    /// All `(key, value)` pairs.
    ///
    /// Keys deleted between the key scan and the read are skipped.
    async fn items(&self) -> StorageResult<Vec<(String, String)>> {
        let mut items = Vec::new();
        for key in self.keys().await? {
            if let Some(value) = self.get_opt(&key).await? {
                items.push((key, value));
            }
        }
        Ok(items)
    }

    /// All values, in key scan order.
    async fn values(&self) -> StorageResult<Vec<String>> {
        Ok(self.items().await?.into_iter().map(|(_, v)| v).collect())
    }

    /// Delete every key present at the time of the scan.
    async fn clear(&self) -> StorageResult<()> {
        for key in self.keys().await? {
            match self.delete(&key).await {
                Ok(()) | Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// One-shot iterator over a key snapshot.
#[derive(Debug, Clone, Default)]
pub struct Keys {
    inner: std::vec::IntoIter<String>,
}

impl Keys {
    pub(crate) fn new(keys: Vec<String>) -> Self {
        Self {
            inner: keys.into_iter(),
        }
    }
}

impl Iterator for Keys {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Keys {}

/// Trait object alias for `MappingStore`.
pub type DynMappingStore = dyn MappingStore;
