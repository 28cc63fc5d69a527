//! Line framing shared by the listener and the client
//!
//! One JSON value per line. Reads stop at `MAX_MESSAGE_SIZE`, so a peer that
//! never sends a newline cannot make the reader buffer without bound.

use eyre::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum size of one line, newline included
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Read one line; None once the peer has closed the connection
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    let bytes_read = (&mut *reader)
        .take(MAX_MESSAGE_SIZE as u64 + 1)
        .read_line(&mut line)
        .await
        .context("Failed to read bus message")?;

    if bytes_read == 0 {
        return Ok(None);
    }
    if bytes_read > MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("Message too large: more than {} bytes", MAX_MESSAGE_SIZE));
    }

    Ok(Some(line))
}

/// Serialize `msg` and write it as one line
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_vec(msg).context("Failed to serialize message")?;
    if json.len() >= MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("Message too large: {} bytes", json.len()));
    }
    json.push(b'\n');

    writer.write_all(&json).await.context("Failed to write message")?;
    writer.flush().await.context("Failed to flush message")?;
    Ok(())
}
