//! Bus listener
//!
//! Binds the Unix Domain Socket and serves publishers. A connection may carry
//! any number of requests; each gets exactly one response line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Context, Result};
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::ProcessorRegistry;
use super::codec::{read_line, write_message};
use super::messages::{BusMessage, BusResponse};

/// Create a listener at a specific path
///
/// Handles cleanup of stale socket files from previous runs.
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener: creating bus socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind bus socket")?;
    debug!(?socket_path, "create_listener: socket bound successfully");

    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Accept connections until shutdown is signalled
pub async fn serve(listener: UnixListener, registry: Arc<ProcessorRegistry>, mut shutdown: watch::Receiver<bool>) {
    info!(topics = ?registry.topics(), "Bus listener started");

    loop {
        tokio::select! {
            biased;
            Ok(_) = shutdown.wait_for(|stop| *stop) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let registry = registry.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, registry).await {
                            debug!(error = %e, "handle_connection: connection ended with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Failed to accept bus connection"),
            },
        }
    }

    info!("Bus listener stopped");
}

/// Serve every request on one connection until the peer hangs up
pub async fn handle_connection(mut stream: UnixStream, registry: Arc<ProcessorRegistry>) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    loop {
        let line = match read_line(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                // The rest of the line is unframed; answer once and drop the connection
                warn!(error = %e, "Unreadable bus message, closing connection");
                let response = BusResponse::Error {
                    message: format!("{e:#}"),
                };
                write_message(&mut writer, &response).await?;
                return Err(e);
            }
        };

        let response = match parse_message(&line) {
            Ok(BusMessage::Publish { event }) => BusResponse::Ack {
                event: registry.dispatch(event).await,
            },
            Ok(BusMessage::Ping) => BusResponse::Pong {
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            Err(e) => {
                warn!(error = %e, "Rejected bus message");
                BusResponse::Error {
                    message: format!("{e:#}"),
                }
            }
        };
        write_message(&mut writer, &response).await?;
        debug!(?response, "handle_connection: sent response");
    }

    debug!("handle_connection: peer closed connection");
    Ok(())
}

pub fn parse_message(line: &str) -> Result<BusMessage> {
    let msg: BusMessage = serde_json::from_str(line.trim()).context("Failed to parse bus message")?;
    debug!(?msg, "parse_message: parsed message");
    Ok(msg)
}
