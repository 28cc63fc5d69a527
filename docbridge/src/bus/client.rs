//! Bus client
//!
//! Publishes events to a running listener and waits for the acknowledgement.
//! Each request uses its own connection.

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tracing::debug;

use super::codec::{read_line, write_message};
use super::messages::{BusMessage, BusResponse};
use super::{Event, get_socket_path};

/// Default timeout for bus operations
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for publishing to the bus via Unix Domain Socket
#[derive(Debug, Clone)]
pub struct BusClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for BusClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BusClient {
    /// Create a new client with the default socket path
    pub fn new() -> Self {
        Self {
            socket_path: get_socket_path(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Check if the listener is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("BusClient: pinging listener");
        match self.request(&BusMessage::Ping).await? {
            BusResponse::Pong { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    /// Publish an event and return it as processed and acknowledged
    pub async fn publish(&self, event: Event) -> Result<Event> {
        debug!(id = %event.id, topic = %event.topic, "BusClient: publishing event");
        let id = event.id.clone();
        match self.request(&BusMessage::Publish { event }).await? {
            BusResponse::Ack { event } if event.id == id => Ok(event),
            BusResponse::Ack { event } => Err(eyre::eyre!("Ack for event {} while waiting for {}", event.id, id)),
            other => Err(unexpected(other)),
        }
    }

    /// One request line out, one response line back, all within the timeout
    async fn request(&self, msg: &BusMessage) -> Result<BusResponse> {
        let mut stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to bus socket")?;

        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);

        let exchange = async {
            write_message(&mut writer, msg).await?;
            read_line(&mut reader)
                .await?
                .ok_or_else(|| eyre::eyre!("Listener closed the connection"))
        };
        let line = tokio::time::timeout(self.timeout, exchange)
            .await
            .context("Bus request timed out")??;

        let response: BusResponse = serde_json::from_str(line.trim()).context("Failed to parse bus response")?;
        debug!(?response, "BusClient: received response");
        Ok(response)
    }
}

fn unexpected(response: BusResponse) -> eyre::Report {
    match response {
        BusResponse::Error { message } => eyre::eyre!("Bus error: {}", message),
        other => eyre::eyre!("Unexpected response: {:?}", other),
    }
}
