//! Per-environment advisory locking.
//!
//! One writer per environment: the installer holds an exclusive advisory
//! file lock for the whole plan-apply window. Contention fails fast with
//! [`LockError::Busy`] rather than blocking; callers surface that as the
//! "environment busy" condition.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::debug;

/// Lock acquisition failure.
#[derive(Error, Debug)]
pub enum LockError {
    /// Another process holds the environment's lock.
    #[error("environment is locked by another process")]
    Busy,

    /// The lock file could not be opened or locked.
    #[error("failed to acquire environment lock: {0}")]
    Io(#[from] std::io::Error),
}

/// An exclusive advisory lock on an environment, released on drop.
#[derive(Debug)]
pub struct EnvLock {
    file: File,
    path: PathBuf,
}

impl EnvLock {
    /// Try to take the lock without blocking.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "environment lock acquired");
                Ok(Self {
                    file,
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(LockError::Busy),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for EnvLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "failed to release environment lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_fast_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        let held = EnvLock::acquire(&path).unwrap();
        let err = EnvLock::acquire(&path).unwrap_err();
        assert!(matches!(err, LockError::Busy));
        drop(held);

        // Released on drop; the next acquire succeeds.
        EnvLock::acquire(&path).unwrap();
    }
}
