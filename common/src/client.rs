//! Client side of the bridge protocol: send a trigger, read one frame.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::framing::Frame;

/// Connect to a bridge, send `signal` followed by a newline, and read the
/// single framed response.  `timeout` bounds the whole exchange, which
/// includes the bridge's own capture wait.
pub async fn request_capture(addr: SocketAddr, signal: &str, timeout: Duration) -> Result<Frame> {
    tokio::time::timeout(timeout, exchange(addr, signal))
        .await
        .with_context(|| format!("No response from {addr} within {}s", timeout.as_secs()))?
}

async fn exchange(addr: SocketAddr, signal: &str) -> Result<Frame> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Cannot connect to {addr}"))?;

    stream
        .write_all(format!("{signal}\n").as_bytes())
        .await
        .context("Cannot send trigger")?;
    debug!("Signal sent to {addr}: {signal}");

    let frame = Frame::read_from(&mut stream)
        .await
        .context("Cannot read response frame")?;
    Ok(frame)
}
