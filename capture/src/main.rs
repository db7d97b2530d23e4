//! UrbanSight Capture – owns the camera and writes captures on request.
//!
//! This binary:
//! 1. Reads configuration from `urbansight.conf`
//! 2. Opens the camera and lets auto-exposure settle
//! 3. Polls for the bridge's trigger flag (or ENTER on stdin) and writes
//!    each capture to `<prefix>_<index>.<ext>` plus the stable alias.

mod camera;
mod encoder;
mod producer;

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::info;

use urbansight_common::config::Config;
use urbansight_common::store::CaptureStore;

use crate::camera::StreamConfig;
use crate::encoder::{ContainerFormat, ImageEncoder};
use crate::producer::Producer;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── load config ──────────────────────────────────────────────────
    let config = Config::from_args(std::env::args().nth(1)).context("Config load failed")?;

    info!(
        "UrbanSight Capture starting (dir={}, flag={})",
        config.capture_dir.display(),
        config.flag_path.display()
    );

    std::fs::create_dir_all(&config.capture_dir).context("Cannot create capture directory")?;

    let format = ContainerFormat::from_extension(&config.capture_ext)
        .with_context(|| format!("Unsupported CAPTURE_EXT '{}'", config.capture_ext))?;

    // ── ctrl-c ───────────────────────────────────────────────────────
    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
        info!("Shutdown signal received");
    })
    .context("Cannot set Ctrl-C handler")?;

    // ── camera ───────────────────────────────────────────────────────
    let camera = camera::open(&StreamConfig::from_config(&config)).context("Camera setup failed")?;

    let keys = if config.keyboard_trigger {
        Some(producer::spawn_keyboard_listener()?)
    } else {
        None
    };

    // ── capture loop ─────────────────────────────────────────────────
    let mut producer = Producer::new(
        CaptureStore::new(&config),
        camera,
        Box::new(ImageEncoder),
        format,
        config.jpeg_quality,
    );
    producer.run(keys.as_ref(), config.producer_poll, &SHUTDOWN);

    info!("UrbanSight Capture stopped");
    Ok(())
}
