//! Per-key advisory file locks.
//!
//! Uses file locks (flock) for coordination between processes. A lock is only
//! effective against writers that follow the same protocol.
//! Note: File locks may not work correctly on all network filesystems.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Diagnostic contents of a held lock file.
#[derive(Serialize)]
struct LockMetadata<'a> {
    pid: u32,
    key: &'a str,
    acquired_at: DateTime<Utc>,
}

/// Exclusive lock on a single key, released when dropped.
///
/// Release unlinks the lock file before unlocking it, so a successful write
/// leaves no lock artifact behind.
#[derive(Debug)]
pub struct KeyLock {
    path: PathBuf,
    file: Option<File>,
}

impl KeyLock {
    /// Acquire the lock at `path`, polling every `retry` until `timeout` elapses.
    ///
    /// A `timeout` of `None` waits indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockTimeout`] when the deadline passes, or
    /// [`StorageError::LockFailed`] if the OS refuses the lock outright.
    pub async fn acquire(
        path: PathBuf,
        key: &str,
        timeout: Option<Duration>,
        retry: Duration,
    ) -> StorageResult<Self> {
        let started = Instant::now();
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;
            if let Some(lock) = Self::try_acquire(&path, key)? {
                debug!(key, attempts, "Key lock acquired");
                return Ok(lock);
            }

            if let Some(timeout) = timeout
                && started.elapsed() >= timeout
            {
                warn!(key, attempts, ?timeout, "Key lock acquisition timed out");
                return Err(StorageError::LockTimeout(format!(
                    "Failed to acquire lock '{}' after {} attempts",
                    path.display(),
                    attempts
                )));
            }

            sleep(retry).await;
        }
    }

    /// Try to acquire the lock at `path` without waiting.
    ///
    /// Returns `None` if another holder has it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be opened or locked.
    pub fn try_acquire(path: &Path, key: &str) -> StorageResult<Option<Self>> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(StorageError::LockFailed(e.to_string())),
        }

        // The previous holder unlinks the file on release; locking that orphaned
        // inode excludes nobody.
        if !still_linked(&file, path)? {
            return Ok(None);
        }

        // From here on Drop owns cleanup, including on a failed metadata write
        let lock = Self {
            path: path.to_path_buf(),
            file: Some(file),
        };
        lock.write_metadata(key)?;

        Ok(Some(lock))
    }

    fn write_metadata(&self, key: &str) -> StorageResult<()> {
        let Some(file) = self.file.as_ref() else {
            return Ok(());
        };

        file.set_len(0)?;
        serde_json::to_writer(
            file,
            &LockMetadata {
                pid: std::process::id(),
                key,
                acquired_at: Utc::now(),
            },
        )?;
        Ok(())
    }

    /// Check if the lock at `path` is currently held.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file exists but cannot be probed.
    pub fn is_locked(path: &Path) -> StorageResult<bool> {
        let file = match std::fs::OpenOptions::new().read(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        match file.try_lock_exclusive() {
            Ok(()) => {
                // We got the lock, so it wasn't locked
                let _ = FileExt::unlock(&file);
                Ok(false)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(true),
            Err(e) => Err(StorageError::LockFailed(e.to_string())),
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = std::fs::remove_file(&self.path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = ?self.path, error = %e, "Failed to remove lock file");
            }
            let _ = FileExt::unlock(&file);
        }
    }
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> std::io::Result<bool> {
    Ok(path.exists())
}
