//! The advisory lock `Remove` and `Optimise` take on the store root: a
//! plain `O_CREAT|O_EXCL` lockfile polled with a short backoff, rather
//! than pulling in a flock()-based dependency for one coordination point.

use crate::error::{IoCreateSnafu, Result};
use snafu::ResultExt;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const LOCK_FILE_NAME: &str = ".lock";
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_ATTEMPTS: u32 = 200; // ~10s total before giving up

/// Holds an exclusive advisory lock on a store root for as long as it's
/// alive; the lockfile is removed on drop.
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// Blocks until the lock is acquired or `MAX_ATTEMPTS` polls have
    /// elapsed, whichever comes first.
    pub fn acquire(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).context(IoCreateSnafu { path: root })?;
        let path = root.join(LOCK_FILE_NAME);

        for attempt in 0..MAX_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(StoreLock { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if attempt + 1 < MAX_ATTEMPTS {
                        thread::sleep(POLL_INTERVAL);
                    }
                }
                Err(e) => return Err(e).context(IoCreateSnafu { path: &path }),
            }
        }

        // Another writer is presumably still holding it; fail atomically
        // rather than proceeding unlocked.
        let timed_out = std::io::Error::new(
            ErrorKind::WouldBlock,
            "store is locked by another process",
        );
        Err(timed_out).context(IoCreateSnafu { path: &path })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                log::warn!("failed to release store lock {}: {e}", self.path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = StoreLock::acquire(dir.path()).unwrap();
            assert!(dir.path().join(LOCK_FILE_NAME).exists());
        }
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn second_acquire_waits_for_first_to_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock = StoreLock::acquire(dir.path()).unwrap();

        let path = dir.path().to_path_buf();
        let handle = thread::spawn(move || StoreLock::acquire(&path).map(|_| ()));

        thread::sleep(Duration::from_millis(100));
        drop(lock);

        handle.join().unwrap().unwrap();
    }
}
