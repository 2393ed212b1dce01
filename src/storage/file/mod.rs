//! File-based storage backend.
//!
//! Every key is a regular file under the root directory whose content is the
//! value, byte for byte. Writers serialize per key through an advisory lock
//! file and replace the entry with an atomic rename, so readers never observe
//! a partially written value.
//!
//! Directory structure:
//! ```text
//! root/
//! ├── {key}                  # value
//! ├── {key}.lock             # held while {key} is being written or deleted
//! └── {key}.{uuid}.tmp       # in-flight write, renamed over {key}
//! ```
//!
//! Names with the `.lock` or `.tmp` suffix are never reported as keys, so a
//! writer that crashed mid-operation does not inflate `len` or `keys`.

mod lock;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::FileStorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::storage::traits::{Keys, MappingStore};

pub use lock::KeyLock;

/// Suffix of per-key lock files.
pub const LOCK_SUFFIX: &str = ".lock";

/// Suffix of in-flight temporary files.
pub const TEMP_SUFFIX: &str = ".tmp";

/// File-based mapping store.
#[derive(Debug, Clone)]
pub struct FileBackend {
    /// Directory holding one file per key.
    root: PathBuf,
    /// Lock acquisition deadline; `None` waits forever.
    lock_timeout: Option<Duration>,
    /// Delay between lock attempts.
    lock_retry: Duration,
}

impl FileBackend {
    /// Open a file store rooted at `root` with default lock timings.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        Self::open_with(&FileStorageConfig::new(root))
    }

    /// Open a file store from configuration.
    ///
    /// The root directory is created if missing; another process creating it
    /// concurrently is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn open_with(config: &FileStorageConfig) -> StorageResult<Self> {
        std::fs::create_dir_all(&config.root)?;
        info!(root = ?config.root, "File backend opened");

        Ok(Self {
            root: config.root.clone(),
            lock_timeout: config.lock_timeout(),
            lock_retry: config.lock_retry_interval(),
        })
    }

    /// Open a file store and apply `entries` in order.
    ///
    /// # Errors
    ///
    /// Returns an error if opening fails or any entry cannot be written.
    pub async fn with_entries(
        config: &FileStorageConfig,
        entries: Vec<(String, String)>,
    ) -> StorageResult<Self> {
        let store = Self::open_with(config)?;
        store.update(entries).await?;
        Ok(store)
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the file path for a key.
    fn entry_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Get the lock file path for a key.
    fn lock_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{LOCK_SUFFIX}"))
    }

    async fn lock_key(&self, key: &str) -> StorageResult<KeyLock> {
        KeyLock::acquire(self.lock_path(key), key, self.lock_timeout, self.lock_retry).await
    }

    /// Write `value` beside `path` and rename it into place.
    fn write_replace(&self, key: &str, path: &Path, value: &str) -> StorageResult<()> {
        let temp = self
            .root
            .join(format!("{key}.{}{TEMP_SUFFIX}", Uuid::new_v4().simple()));

        if let Err(e) = write_then_rename(&temp, path, value) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }

        Ok(())
    }

    /// List key names in directory order.
    fn scan(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }

            let Ok(name) = entry.file_name().into_string() else {
                warn!(path = ?entry.path(), "Skipping non UTF-8 file name");
                continue;
            };

            if is_reserved(&name) {
                continue;
            }

            keys.push(name);
        }

        Ok(keys)
    }
}

#[async_trait]
impl MappingStore for FileBackend {
    async fn get(&self, key: &str) -> StorageResult<String> {
        let path = self.entry_path(key)?;

        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(_) if path.is_dir() => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.entry_path(key)?;
        let _guard = self.lock_key(key).await?;

        self.write_replace(key, &path, value)?;
        debug!(key, bytes = value.len(), "Entry written");

        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.entry_path(key)?;
        let _guard = self.lock_key(key).await?;

        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(key, "Entry deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn len(&self) -> StorageResult<usize> {
        Ok(self.scan()?.len())
    }

    async fn keys(&self) -> StorageResult<Keys> {
        Ok(Keys::new(self.scan()?))
    }

    async fn contains(&self, key: &str) -> StorageResult<bool> {
        // An invalid key can never have been stored
        if validate_key(key).is_err() {
            return Ok(false);
        }
        Ok(self.get_opt(key).await?.is_some())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

/// Check that `key` names a single, non-reserved file under the root.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] describing the first rule violated.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_key(key, "key is empty"));
    }
    if key == "." || key == ".." {
        return Err(StorageError::invalid_key(key, "key is a relative path"));
    }
    if key.contains(['/', '\\']) {
        return Err(StorageError::invalid_key(key, "contains a path separator"));
    }
    if key.contains('\0') {
        return Err(StorageError::invalid_key(key, "contains a NUL byte"));
    }
    if is_reserved(key) {
        return Err(StorageError::invalid_key(key, "uses a reserved suffix"));
    }
    Ok(())
}

fn write_then_rename(temp: &Path, target: &Path, value: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp)?;
    file.write_all(value.as_bytes())?;
    file.sync_all()?;
    std::fs::rename(temp, target)
}

fn is_reserved(name: &str) -> bool {
    name.ends_with(LOCK_SUFFIX) || name.ends_with(TEMP_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (FileBackend, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileBackend::open(temp_dir.path().join("dict")).unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_set_get_overwrite() {
        let (store, _temp) = create_test_store();

        store.set("greeting", "hello").await.unwrap();
        assert_eq!(store.get("greeting").await.unwrap(), "hello");

        store.set("greeting", "hi").await.unwrap();
        assert_eq!(store.get("greeting").await.unwrap(), "hi");
        assert_eq!(store.len().await.unwrap(), 1);

        // Stored verbatim, no encoding
        let raw = std::fs::read_to_string(store.root().join("greeting")).unwrap();
        assert_eq!(raw, "hi");
    }

    #[tokio::test]
    async fn test_shorter_value_fully_replaces_longer() {
        let (store, _temp) = create_test_store();

        store.set("k", "a much longer value").await.unwrap();
        store.set("k", "short").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), "short");
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _temp) = create_test_store();

        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        assert_eq!(store.len().await.unwrap(), 2);

        store.delete("a").await.unwrap();
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(!store.contains("a").await.unwrap());
        assert!(store.get("a").await.unwrap_err().is_not_found());
        assert!(!store.root().join("a.lock").exists());
    }

    #[tokio::test]
    async fn test_absent_key_has_no_side_effect() {
        let (store, _temp) = create_test_store();
        store.set("present", "x").await.unwrap();

        assert!(matches!(
            store.get("missing").await,
            Err(StorageError::NotFound(k)) if k == "missing"
        ));
        assert!(matches!(
            store.delete("missing").await,
            Err(StorageError::NotFound(_))
        ));

        let keys: Vec<String> = store.keys().await.unwrap().collect();
        assert_eq!(keys, vec!["present".to_string()]);
    }

    #[tokio::test]
    async fn test_no_lock_artifacts_after_write() {
        let (store, _temp) = create_test_store();

        store.set("k", "v").await.unwrap();

        let names: Vec<String> = std::fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_artifacts_are_not_keys() {
        let (store, _temp) = create_test_store();

        store.set("k", "v").await.unwrap();
        std::fs::write(store.root().join("k.lock"), "").unwrap();
        std::fs::write(store.root().join("k.0123.tmp"), "partial").unwrap();
        std::fs::create_dir(store.root().join("subdir")).unwrap();

        assert_eq!(store.len().await.unwrap(), 1);
        let keys: Vec<String> = store.keys().await.unwrap().collect();
        assert_eq!(keys, vec!["k".to_string()]);

        // The stale lock is not held by anyone and is reclaimed by the next write
        store.set("k", "v2").await.unwrap();
        assert!(!store.root().join("k.lock").exists());
    }

    #[tokio::test]
    async fn test_held_lock_times_out_writer() {
        let temp = TempDir::new().unwrap();
        let config = FileStorageConfig {
            root: temp.path().to_path_buf(),
            lock_timeout_ms: 40,
            lock_retry_ms: 5,
        };
        let store = FileBackend::open_with(&config).unwrap();
        store.set("k", "before").await.unwrap();

        let held = KeyLock::try_acquire(&temp.path().join("k.lock"), "k")
            .unwrap()
            .unwrap();

        assert!(matches!(
            store.set("k", "after").await,
            Err(StorageError::LockTimeout(_))
        ));
        assert!(matches!(
            store.delete("k").await,
            Err(StorageError::LockTimeout(_))
        ));
        assert_eq!(store.get("k").await.unwrap(), "before");

        drop(held);
        store.set("k", "after").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), "after");
    }

    #[tokio::test]
    async fn test_io_failure_is_not_folded_into_not_found() {
        let (store, _temp) = create_test_store();

        std::fs::write(store.root().join("binary"), [0xff, 0xfe, 0x00]).unwrap();

        let err = store.get("binary").await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_contains_agrees_with_get_on_unreadable_entry() {
        let (store, _temp) = create_test_store();

        std::fs::write(store.root().join("binary"), [0xff, 0xfe]).unwrap();
        assert!(store.get("binary").await.is_err());

        // The entry exists on disk but cannot be read back as a value
        assert!(matches!(
            store.contains("binary").await,
            Err(StorageError::Io(_))
        ));

        store.set("text", "ok").await.unwrap();
        assert!(store.contains("text").await.unwrap());
        assert!(!store.contains("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let (store, _temp) = create_test_store();

        for key in ["", ".", "..", "a/b", "a\\b", "x.lock", "x.tmp", "nul\0"] {
            assert!(
                matches!(
                    store.set(key, "v").await,
                    Err(StorageError::InvalidKey { .. })
                ),
                "key {key:?} should be rejected"
            );
            assert!(!store.contains(key).await.unwrap());
        }

        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_reopen_existing_root() {
        let temp = TempDir::new().unwrap();

        let first = FileBackend::open(temp.path()).unwrap();
        first.set("k", "v").await.unwrap();

        let second = FileBackend::open(temp.path()).unwrap();
        assert_eq!(second.get("k").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_with_entries_end_to_end() {
        let temp = TempDir::new().unwrap();
        let store = FileBackend::with_entries(
            &FileStorageConfig::new(temp.path()),
            vec![
                ("k1".to_string(), "v1".to_string()),
                ("k2".to_string(), "v2".to_string()),
            ],
        )
        .await
        .unwrap();

        assert_eq!(store.len().await.unwrap(), 2);
        let mut keys: Vec<String> = store.keys().await.unwrap().collect();
        keys.sort();
        assert_eq!(keys, vec!["k1".to_string(), "k2".to_string()]);

        store.delete("k1").await.unwrap();
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.get("k1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_pop_items_clear() {
        let (store, _temp) = create_test_store();
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();

        assert_eq!(store.pop("a").await.unwrap(), "1");
        assert!(store.pop("a").await.unwrap_err().is_not_found());

        assert_eq!(
            store.items().await.unwrap(),
            vec![("b".to_string(), "2".to_string())]
        );
        assert_eq!(store.values().await.unwrap(), vec!["2".to_string()]);

        store.clear().await.unwrap();
        assert!(store.is_empty().await.unwrap());
        assert_eq!(store.get_opt("b").await.unwrap(), None);
    }
}
