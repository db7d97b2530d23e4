//! Error kinds of the bridge.
//!
//! Everything a client can observe collapses into the same zero-length
//! failure frame; the variants only matter for logging and for deciding
//! whether the process survives.

use std::path::PathBuf;

use thiserror::Error;

use urbansight_common::error::{FramingError, LockError, StoreError};

#[derive(Debug, Error)]
pub enum BridgeError {
    /// No fresh capture within the wait, or it never became readable.
    #[error("no capture available: {0}")]
    NoCaptureAvailable(String),

    /// One stable-read attempt failed; retried before it folds into
    /// [`BridgeError::NoCaptureAvailable`].
    #[error("capture unstable or truncated: {0}")]
    UnstableOrTruncatedFile(#[source] StoreError),

    /// Accept, read or write failure on one connection.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Bind, listen, advertise or lock failure at startup.
    #[error("setup failed: {0}")]
    Setup(String),

    #[error("another bridge is already running (lock {}, pid {})", path.display(), pid.map(|p| p.to_string()).unwrap_or_else(|| "unknown".into()))]
    AlreadyRunning { path: PathBuf, pid: Option<u32> },
}

impl BridgeError {
    /// Only startup failures end the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Setup(_) | Self::AlreadyRunning { .. })
    }
}

impl From<LockError> for BridgeError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::AlreadyRunning { path, pid } => Self::AlreadyRunning { path, pid },
            other => Self::Setup(other.to_string()),
        }
    }
}

impl From<FramingError> for BridgeError {
    fn from(e: FramingError) -> Self {
        match e {
            FramingError::Io(io) => Self::Transport(io),
            other => Self::Transport(std::io::Error::new(std::io::ErrorKind::InvalidData, other)),
        }
    }
}
