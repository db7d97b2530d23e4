//! The capture loop: wait for the trigger flag or an ENTER keypress, grab a
//! frame, write it to the next indexed path and the stable alias.
//!
//! The flag is deleted *before* the camera is touched, so a slow capture
//! can never be triggered twice by the same request.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use urbansight_common::store::CaptureStore;

use crate::camera::Camera;
use crate::encoder::{ContainerFormat, Encoder};

/// What asked for a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Flag,
    Keypress,
}

pub struct Producer {
    store: CaptureStore,
    camera: Box<dyn Camera>,
    encoder: Box<dyn Encoder>,
    format: ContainerFormat,
    quality: u8,
    next_index: u64,
}

impl Producer {
    /// The next index is derived from the store once, here, and only
    /// incremented in memory afterwards.
    pub fn new(
        store: CaptureStore,
        camera: Box<dyn Camera>,
        encoder: Box<dyn Encoder>,
        format: ContainerFormat,
        quality: u8,
    ) -> Self {
        let next_index = store.next_index();
        info!(
            "Next capture: {}",
            store.indexed_path(next_index).display()
        );
        Self {
            store,
            camera,
            encoder,
            format,
            quality,
            next_index,
        }
    }

    /// Check both trigger sources once.  A flag only counts once it has been
    /// deleted, so an undeletable flag can never trigger repeated captures.
    pub fn poll(&self, keys: Option<&Receiver<()>>) -> Option<Trigger> {
        if self.store.flag_present() {
            match self.store.consume_flag() {
                Ok(true) => {
                    debug!("Trigger flag consumed");
                    return Some(Trigger::Flag);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Ignoring trigger flag: {e}");
                    return None;
                }
            }
        }

        match keys.map(Receiver::try_recv) {
            Some(Ok(())) => Some(Trigger::Keypress),
            _ => None,
        }
    }

    /// Take one capture.  Failures are logged and leave no file behind;
    /// the loop simply goes back to waiting.
    pub fn capture(&mut self, trigger: Trigger) -> Option<PathBuf> {
        let frame = match self.camera.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!("No frame captured ({trigger:?}), try again.");
                return None;
            }
            Err(e) => {
                error!("Camera error: {e:#}");
                return None;
            }
        };

        let bytes = match self.encoder.encode(&frame, self.format, self.quality) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Encoding failed: {e}");
                return None;
            }
        };

        let path = self.store.indexed_path(self.next_index);
        if let Err(e) = std::fs::write(&path, &bytes) {
            error!("Cannot write {}: {e}", path.display());
            let _ = std::fs::remove_file(&path);
            return None;
        }

        if let Some(alias) = self.store.primary_alias() {
            if let Err(e) = std::fs::write(alias, &bytes) {
                warn!("Cannot update {}: {e}", alias.display());
            }
        }

        self.next_index += 1;
        info!(
            "{} saved ({} bytes, {trigger:?})",
            path.display(),
            bytes.len()
        );
        Some(path)
    }

    /// Poll until `shutdown` is set, then release the camera.
    pub fn run(&mut self, keys: Option<&Receiver<()>>, poll_interval: Duration, shutdown: &AtomicBool) {
        info!(
            "Press ENTER to capture an image, or trigger via {}. Ctrl+C to quit.",
            self.store.flag_path().display()
        );

        while !shutdown.load(Ordering::Relaxed) {
            match self.poll(keys) {
                Some(trigger) => {
                    self.capture(trigger);
                }
                None => std::thread::sleep(poll_interval),
            }
        }

        self.camera.close();
        info!("Capture loop stopped");
    }
}

/// Forward each line typed on stdin as a capture request.  The channel
/// disconnects when stdin closes.
pub fn spawn_keyboard_listener() -> Result<Receiver<()>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("keyboard".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if line.is_err() || tx.send(()).is_err() {
                    break;
                }
            }
            debug!("stdin closed – keyboard trigger disabled");
        })
        .context("Cannot spawn keyboard thread")?;
    Ok(rx)
}
