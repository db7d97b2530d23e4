//! Single-instance guard for the bridge.
//!
//! The flag protocol assumes exactly one consumer: two bridges raising and
//! watching the same flag would each take the other's capture as fresh.
//! The lock is a marker file holding the owner's pid, created with
//! `create_new` so two racing starts cannot both succeed.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::LockError;

/// Held for the lifetime of a bridge process.  Released on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    released: bool,
}

impl InstanceLock {
    /// Claim the lock, recording the current pid.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(LockError::AlreadyRunning {
                    path: path.to_path_buf(),
                    pid: read_pid(path),
                });
            }
            Err(source) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let lock = Self {
            path: path.to_path_buf(),
            released: false,
        };
        // From here on a failure still removes the marker via Drop.
        write!(file, "{}", std::process::id()).map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Acquired instance lock {}", path.display());
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort removal of the marker.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("Released instance lock {}", self.path.display()),
            Err(e) => warn!("Cannot remove lock {}: {e}", self.path.display()),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Pid recorded in an existing marker, if readable.
fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.lock");

        let lock = InstanceLock::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));

        lock.release();
        assert!(!path.exists());
    }

    #[test]
    fn test_second_acquire_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.lock");

        let _held = InstanceLock::acquire(&path).unwrap();
        match InstanceLock::acquire(&path) {
            Err(LockError::AlreadyRunning { pid, .. }) => {
                assert_eq!(pid, Some(std::process::id()))
            }
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
        // the failed attempt must not have removed the holder's marker
        assert!(path.exists());
    }

    #[test]
    fn test_stale_marker_blocks_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.lock");
        std::fs::write(&path, "garbage").unwrap();

        assert!(matches!(
            InstanceLock::acquire(&path),
            Err(LockError::AlreadyRunning { pid: None, .. })
        ));
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.lock");
        {
            let _lock = InstanceLock::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
        InstanceLock::acquire(&path).unwrap().release();
    }
}
