//! Advisory file lock guarding the index directory.
//!
//! Readers take a shared lock, writers an exclusive one, so no reader ever
//! observes the vector file and metadata file from different writes. The lock
//! is released when the guard is dropped.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Result, SagaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
pub struct IndexLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl IndexLock {
    pub const FILENAME: &'static str = "index.lock";

    /// Block until a shared (read) lock is held.
    pub fn shared(dir: &Path) -> Result<Self> {
        Self::acquire(dir, LockMode::Shared)
    }

    /// Block until an exclusive (write) lock is held.
    pub fn exclusive(dir: &Path) -> Result<Self> {
        Self::acquire(dir, LockMode::Exclusive)
    }

    /// Take the exclusive lock if nobody holds the directory, else `None`.
    pub fn try_exclusive(dir: &Path) -> Result<Option<Self>> {
        let (file, path) = open_lock_file(dir)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "acquired exclusive index lock (non-blocking)");
                Ok(Some(Self {
                    file,
                    path,
                    mode: LockMode::Exclusive,
                }))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(SagaError::Lock(format!("try lock {}: {e}", path.display()))),
        }
    }

    /// Poll [`try_exclusive`](Self::try_exclusive) until `timeout` elapses.
    pub fn exclusive_with_timeout(dir: &Path, timeout: Duration) -> Result<Self> {
        let start = Instant::now();
        loop {
            if let Some(lock) = Self::try_exclusive(dir)? {
                return Ok(lock);
            }
            if start.elapsed() >= timeout {
                return Err(SagaError::Lock(format!(
                    "timed out after {timeout:?} waiting for {}",
                    dir.join(Self::FILENAME).display()
                )));
            }
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    fn acquire(dir: &Path, mode: LockMode) -> Result<Self> {
        let (file, path) = open_lock_file(dir)?;
        let locked = match mode {
            LockMode::Shared => FileExt::lock_shared(&file),
            LockMode::Exclusive => FileExt::lock_exclusive(&file),
        };
        locked.map_err(|e| SagaError::Lock(format!("acquire {mode:?} lock on {}: {e}", path.display())))?;
        debug!(path = %path.display(), ?mode, "acquired index lock");
        Ok(Self { file, path, mode })
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), mode = ?self.mode, error = %e, "failed to release index lock");
        }
    }
}

fn open_lock_file(dir: &Path) -> Result<(File, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(IndexLock::FILENAME);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| SagaError::Lock(format!("open {}: {e}", path.display())))?;
    Ok((file, path))
}
