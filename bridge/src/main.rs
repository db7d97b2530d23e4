//! UrbanSight Bridge – hands fresh captures to remote clients.
//!
//! This binary:
//! 1. Reads configuration from `urbansight.conf`
//! 2. Claims the single-instance lock
//! 3. Listens on TCP and advertises itself over mDNS
//! 4. For each client: raises the trigger flag, waits for a capture newer
//!    than the request, and sends it back as one size-prefixed frame.

mod cycle;
mod error;
mod server;
mod signal;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use urbansight_common::config::Config;
use urbansight_common::discovery;
use urbansight_common::lock::InstanceLock;

use crate::error::BridgeError;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── load config ──────────────────────────────────────────────────
    let config = Config::from_args(std::env::args().nth(1)).context("Config load failed")?;

    info!(
        "UrbanSight Bridge starting (listen={}, dir={}, flag={})",
        config.listen_addr,
        config.capture_dir.display(),
        config.flag_path.display()
    );

    if let Err(e) = serve(Arc::new(config)).await {
        if e.is_fatal() {
            error!("Bridge cannot start: {e}");
        }
        return Err(e.into());
    }

    info!("UrbanSight Bridge stopped");
    Ok(())
}

async fn serve(config: Arc<Config>) -> Result<(), BridgeError> {
    // ── single instance ──────────────────────────────────────────────
    let lock = InstanceLock::acquire(&config.lock_path)?;

    // ── ctrl-c ───────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
        info!("Shutdown signal received");
    })
    .map_err(|e| BridgeError::Setup(format!("cannot set Ctrl-C handler: {e}")))?;

    // ── listen + advertise ───────────────────────────────────────────
    let listener = server::bind(&config.listen_addr).await?;
    let port = listener.local_addr()?.port();

    let advertisement = if config.advertise {
        let registered = tokio::task::spawn_blocking(move || discovery::register(port))
            .await
            .map_err(|e| BridgeError::Setup(format!("mDNS task failed: {e}")))?
            .map_err(|e| BridgeError::Setup(format!("{e:#}")))?;
        info!("Discoverable as {}", registered.instance_name());
        Some(registered)
    } else {
        warn!("mDNS advertisement disabled; clients need the address");
        None
    };

    // ── accept loop ──────────────────────────────────────────────────
    let outcome = server::run(listener, config, shutdown).await;

    if let Some(advertisement) = advertisement {
        advertisement.shutdown();
    }
    info!("Releasing {}", lock.path().display());
    lock.release();
    outcome
}
