//! TCP front end of the bridge.
//!
//! Protocol per connection:
//!   client → bridge   trigger text (`TAKE_PICTURE_SIGNAL\n`), advisory only
//!   bridge → client   one size-prefixed frame, then close
//!
//! Connections are served strictly one at a time: the next accept only
//! happens after the previous cycle has delivered and closed.  Nothing that
//! goes wrong inside a connection stops the accept loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use urbansight_common::config::Config;
use urbansight_common::framing::Frame;
use urbansight_common::store::CaptureStore;

use crate::cycle;
use crate::error::BridgeError;
use crate::signal::TriggerSignal;

/// Bytes read from the client before a cycle starts.
const TRIGGER_BUFFER: usize = 1024;

/// How often the accept loop re-checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// Bind the listening socket.  Failure here is fatal.
pub async fn bind(addr: &str) -> Result<TcpListener, BridgeError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| BridgeError::Setup(format!("cannot listen on {addr}: {e}")))?;
    info!("Bridge listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept and serve clients until `shutdown` is set.
pub async fn run(
    listener: TcpListener,
    config: Arc<Config>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), BridgeError> {
    let store = CaptureStore::new(&config);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let accepted = match tokio::time::timeout(SHUTDOWN_POLL, listener.accept()).await {
            Ok(accepted) => accepted,
            Err(_) => continue,
        };

        let outcome = match accepted {
            Ok((stream, peer)) => {
                info!("Accepted connection from {peer}; waiting for trigger...");
                serve_client(stream, peer, &store, &config).await
            }
            Err(e) => Err(BridgeError::Transport(e)),
        };

        if let Err(e) = outcome {
            warn!("Connection error: {e}");
            tokio::time::sleep(config.error_backoff).await;
        }
        info!("Client disconnected. Waiting for next connection...");
    }

    info!("Accept loop stopped");
    Ok(())
}

/// One full cycle: read trigger, capture, frame, close.
async fn serve_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    store: &CaptureStore,
    config: &Arc<Config>,
) -> Result<(), BridgeError> {
    let idle = config.client_timeout;

    let mut buf = [0u8; TRIGGER_BUFFER];
    let n = with_idle_timeout(idle, stream.read(&mut buf)).await?;

    match TriggerSignal::interpret(&buf[..n], &config.trigger_signal) {
        TriggerSignal::Recognized | TriggerSignal::Empty => info!("Trigger received from {peer}"),
        TriggerSignal::Unexpected(text) => {
            warn!("Unexpected signal from {peer}: {text:?}. Proceeding anyway...")
        }
    }

    let cycle_store = store.clone();
    let cycle_config = config.clone();
    let outcome = tokio::task::spawn_blocking(move || cycle::capture_fresh(&cycle_store, &cycle_config))
        .await
        .unwrap_or_else(|e| Err(BridgeError::NoCaptureAvailable(format!("capture task failed: {e}"))));

    let frame = match outcome {
        Ok(bytes) => {
            info!("Sending image ({} bytes) to {peer}", bytes.len());
            Frame::Payload(bytes)
        }
        Err(e) => {
            warn!("{e}; sending error frame to {peer}");
            Frame::failure(config.error_message.as_str())
        }
    };

    with_idle_timeout(idle, frame.write_to(&mut stream)).await?;
    debug!("Frame delivered to {peer}");

    let _ = stream.shutdown().await;
    Ok(())
}

async fn with_idle_timeout<T, E>(
    idle: Duration,
    fut: impl std::future::Future<Output = Result<T, E>>,
) -> Result<T, BridgeError>
where
    BridgeError: From<E>,
{
    match tokio::time::timeout(idle, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(BridgeError::Transport(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("client idle for {}s", idle.as_secs()),
        ))),
    }
}
