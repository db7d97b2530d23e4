//! urbansight-fetch – ask a bridge for one fresh capture and save it.
//!
//! Usage: `urbansight-fetch [ADDR] [OUTPUT]`
//!
//! Without ADDR the bridge is located over mDNS.  Without OUTPUT the
//! capture is saved as `urbansight_<unix-millis>.<ext>` in the current
//! directory.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use urbansight_common::client::request_capture;
use urbansight_common::config::Config;
use urbansight_common::discovery;
use urbansight_common::framing::Frame;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Slack on top of the bridge's own capture wait.
const RESPONSE_SLACK: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let addr_arg = args.next();
    let output_arg = args.next();

    let config = Config::from_args(None).context("Config load failed")?;

    let addr = match addr_arg {
        Some(a) => a
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bridge address '{a}'"))?,
        None => locate_bridge().await?,
    };

    info!("Requesting capture from {addr}");
    let frame = request_capture(
        addr,
        &config.trigger_signal,
        config.capture_timeout + RESPONSE_SLACK,
    )
    .await?;

    let bytes = match frame {
        Frame::Payload(bytes) if !bytes.is_empty() => bytes,
        Frame::Payload(_) => bail!("Bridge error: Unknown error"),
        Frame::Failure(text) => {
            let text = text.trim();
            bail!(
                "Bridge error: {}",
                if text.is_empty() { "Unknown error" } else { text }
            )
        }
    };

    let output = output_arg
        .map(PathBuf::from)
        .unwrap_or_else(|| default_output(&config.capture_ext));
    std::fs::write(&output, &bytes)
        .with_context(|| format!("Cannot write {}", output.display()))?;

    info!("Saved {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}

async fn locate_bridge() -> Result<SocketAddr> {
    info!("Looking for a bridge via mDNS...");
    let peers = tokio::task::spawn_blocking(|| discovery::discover(DISCOVERY_TIMEOUT))
        .await
        .context("Discovery task failed")??;

    peers
        .iter()
        .find_map(|p| p.socket_addr())
        .context("No bridge found on the network; pass ADDR explicitly")
}

fn default_output(ext: &str) -> PathBuf {
    PathBuf::from(format!(
        "urbansight_{}.{ext}",
        chrono::Utc::now().timestamp_millis()
    ))
}
