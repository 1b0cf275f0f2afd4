//! Advisory per-directory lock preventing two `Database` instances from
//! opening the same directory at once.

use fs2::FileExt;
use sediment_core::Error;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE_NAME: &str = "flock";

/// Holds an exclusive, non-blocking advisory lock on `<dir>/flock` for as
/// long as it is alive. Dropping it releases the lock; the lock file
/// itself is left on disk (its mere presence is not a signal — only
/// holding the lock is).
pub struct DirectoryLock {
    file: File,
    path: PathBuf,
}

impl DirectoryLock {
    /// Acquire the lock for `dir`. Fails with
    /// [`Error::DirectoryInUse`](sediment_core::Error::DirectoryInUse) if
    /// another instance already holds it.
    pub fn acquire(dir: &Path) -> Result<DirectoryLock, Error> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|_| Error::DirectoryInUse)?;
        Ok(DirectoryLock { file, path })
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), %err, "failed to release directory lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_lock_on_same_directory_fails() {
        let dir = tempdir().unwrap();
        let first = DirectoryLock::acquire(dir.path()).unwrap();
        let second = DirectoryLock::acquire(dir.path());
        assert!(matches!(second, Err(Error::DirectoryInUse)));
        drop(first);
        assert!(DirectoryLock::acquire(dir.path()).is_ok());
    }
}
