//! Error types for the capture store, the instance lock and the wire framing.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while inspecting or reading the capture store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The file vanished or cannot be stat'ed.  Scans treat this as absent.
    #[error("cannot access {}: {source}", path.display())]
    NotAccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Size changed between the two samples of the stable-read guard.
    #[error("{} is still being written ({first} -> {second} bytes)", path.display())]
    Unstable {
        path: PathBuf,
        first: u64,
        second: u64,
    },

    #[error("{} is too small to be a capture ({size} < {min} bytes)", path.display())]
    Truncated { path: PathBuf, size: u64, min: u64 },

    #[error("cannot update trigger flag {}: {source}", path.display())]
    Flag {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub(crate) fn not_accessible(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::NotAccessible {
            path: path.into(),
            source,
        }
    }
}

/// Failures of the single-instance guard.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("another bridge is already running (lock {}, pid {})", path.display(), pid.map(|p| p.to_string()).unwrap_or_else(|| "unknown".into()))]
    AlreadyRunning { path: PathBuf, pid: Option<u32> },

    #[error("cannot create lock {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures while encoding or decoding a size-prefixed frame.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("payload of {0} bytes does not fit a 32-bit length prefix")]
    TooLarge(usize),

    #[error("connection closed after {received} of {expected} payload bytes")]
    Truncated { expected: u32, received: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}
