//! Advisory lock that keeps two sweeps off the same archive root.

use crate::error::{Result, SweepError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LOCK_FILE_NAME: &str = ".archive-sweeper.lock";

/// Held for the duration of a run; the lock is released on drop.
#[derive(Debug)]
pub struct RootLock {
    file: File,
    path: PathBuf,
}

impl RootLock {
    /// Take the lock without waiting. Fails with `SweepError::Locked` when
    /// another process already holds it.
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| SweepError::access(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "acquired root lock");
                Ok(RootLock { file, path })
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Err(SweepError::Locked { path }),
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(SweepError::Locked { path })
            }
            Err(err) => Err(SweepError::access(&path, err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            debug!(path = %self.path.display(), error = %err, "failed to release root lock");
        }
    }
}
