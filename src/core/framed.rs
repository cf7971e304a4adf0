//! # Framed Connection
//!
//! Wraps a duplex byte stream with a read timeout and an accumulation buffer
//! for bytes that do not yet form a complete message.
//!
//! Each [`FramedConnection::read`] performs a single read under the configured
//! timeout and appends whatever arrived to the buffer. Callers inspect the
//! accumulated bytes through [`FramedConnection::buffered`] and drop the
//! prefix they managed to decode with [`FramedConnection::discard`]; the rest
//! stays put for the next read.
//!
//! ## Security
//! - A read that leaves more than `max_incomplete_size` bytes buffered fails
//!   with `IncompleteDataTooLarge`, so a peer streaming bytes that never form
//!   a message cannot grow memory without bound
//! - End-of-stream is reported as `ConnectionClosed`, never as a generic error

use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::{ProtocolError, Result};

/// Spare room guaranteed in the buffer before each read.
const READ_CHUNK: usize = 4096;

/// A byte stream with partial-message accumulation.
#[derive(Debug)]
pub struct FramedConnection<S> {
    stream: S,
    read_timeout: Duration,
    max_incomplete_size: usize,
    buffer: BytesMut,
}

impl<S> FramedConnection<S> {
    pub fn new(stream: S, read_timeout: Duration, max_incomplete_size: usize) -> Self {
        Self {
            stream,
            read_timeout,
            max_incomplete_size,
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Bytes received but not yet discarded.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop `count` processed bytes from the front of the buffer.
    ///
    /// Counts past the end of the buffer clear it.
    pub fn discard(&mut self, count: usize) {
        let count = count.min(self.buffer.len());
        self.buffer.advance(count);
        trace!(discarded = count, remaining = self.buffer.len(), "Discarded buffered bytes");
    }

    /// Drop everything currently buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn max_incomplete_size(&self) -> usize {
        self.max_incomplete_size
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> FramedConnection<S>
where
    S: AsyncRead + Unpin,
{
    /// Perform one timed read and append the result to the buffer.
    ///
    /// Returns the number of new bytes. The read is cancel safe: if the future
    /// is dropped before completing, no data has been taken from the stream.
    ///
    /// # Errors
    /// - `Timeout` if nothing arrived within the read timeout; buffered data is kept
    /// - `ConnectionClosed` on end-of-stream
    /// - `IncompleteDataTooLarge` if the buffer now exceeds the configured maximum
    /// - `Io` for any other stream failure
    pub async fn read(&mut self) -> Result<usize> {
        self.buffer.reserve(READ_CHUNK);

        let received = match tokio::time::timeout(
            self.read_timeout,
            self.stream.read_buf(&mut self.buffer),
        )
        .await
        {
            Err(_) => return Err(ProtocolError::Timeout),
            Ok(Err(e)) => return Err(ProtocolError::Io(e)),
            Ok(Ok(0)) => {
                debug!(buffered = self.buffer.len(), "Peer closed the stream");
                return Err(ProtocolError::ConnectionClosed);
            }
            Ok(Ok(n)) => n,
        };

        if self.buffer.len() > self.max_incomplete_size {
            return Err(ProtocolError::IncompleteDataTooLarge {
                size: self.buffer.len(),
                limit: self.max_incomplete_size,
            });
        }

        trace!(received, buffered = self.buffer.len(), "Read from stream");
        Ok(received)
    }
}

impl<S> FramedConnection<S>
where
    S: AsyncWrite + Unpin,
{
    /// Write all of `bytes` to the stream and flush.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(bytes.len())
    }

    /// Shut down the write side of the stream.
    pub async fn close(&mut self) -> Result<()> {
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            // Already torn down by the peer
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
