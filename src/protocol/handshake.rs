//! Identity handshake run on a raw stream before framing begins.
//!
//! A connecting client sends exactly 16 bytes: the UUID it will be known by
//! for the lifetime of the connection. Nothing else is exchanged; the
//! connection switches to the message wire format immediately afterwards.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::core::id::{ClientId, IDENTITY_LEN};
use crate::error::{constants, ProtocolError, Result};

/// Read the client's 16-byte identity within `timeout`.
///
/// The deadline covers the whole identity, not each individual read, so a
/// client trickling one byte at a time cannot hold the handshake open.
///
/// # Errors
/// - `HandshakeTimeout` if no byte arrived before the deadline
/// - `IncompleteHandshake(n)` if the stream ended or the deadline passed
///   after only `n` bytes
/// - `HandshakeFailure` if the bytes decode to the nil UUID
/// - `Io` for other stream failures
#[instrument(skip(stream))]
pub async fn read_client_id<S>(stream: &mut S, timeout: Duration) -> Result<ClientId>
where
    S: AsyncRead + Unpin,
{
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; IDENTITY_LEN];
    let mut filled = 0;

    while filled < IDENTITY_LEN {
        let read = tokio::time::timeout_at(deadline, stream.read(&mut buf[filled..])).await;
        match read {
            Err(_) if filled == 0 => return Err(ProtocolError::HandshakeTimeout),
            Err(_) => return Err(ProtocolError::IncompleteHandshake(filled)),
            Ok(Ok(0)) => {
                warn!(received = filled, "Stream ended during handshake");
                return Err(ProtocolError::IncompleteHandshake(filled));
            }
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    let id = ClientId::from_bytes(buf);
    if id.is_nil() {
        return Err(ProtocolError::HandshakeFailure(
            constants::ERR_NIL_IDENTITY.to_string(),
        ));
    }

    debug!(client = %id, "Handshake completed");
    Ok(id)
}

/// Client side of the handshake: announce `id` to the server.
#[instrument(skip(stream))]
pub async fn send_client_id<S>(stream: &mut S, id: ClientId) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    if id.is_nil() {
        return Err(ProtocolError::HandshakeFailure(
            constants::ERR_NIL_IDENTITY.to_string(),
        ));
    }
    stream.write_all(id.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
