//! # Error Types
//!
//! Error handling for the chat transport.
//!
//! This module defines every error variant that can surface from the transport
//! core, from low-level I/O failures up to routing problems in the processing
//! service.
//!
//! ## Error Categories
//! - **Transport-fatal**: disconnects, oversized incomplete data
//! - **Transport-transient**: read timeouts (retried by the listener)
//! - **Protocol**: unrecognized tags, malformed lengths, invalid content
//! - **Callback faults**: panics captured at a fault boundary
//! - **Initialization**: bind failures, duplicate accept loops
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use chat_transport::core::codec;
//! use chat_transport::error::ProtocolError;
//!
//! // Two bytes cannot hold a message tag yet
//! match codec::decode(&[0x02, 0x00]) {
//!     Err(e) if e.is_incomplete() => { /* wait for more bytes */ }
//!     Err(ProtocolError::UnsupportedMessageType(tag)) => panic!("bad tag {tag}"),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

use crate::core::id::ClientId;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Registry lock errors
    pub const ERR_REGISTRY_WRITE_LOCK: &str = "Failed to acquire write lock on client registry";
    pub const ERR_REGISTRY_READ_LOCK: &str = "Failed to acquire read lock on client registry";

    /// Room directory and message store lock errors
    pub const ERR_ROOMS_LOCK: &str = "Failed to acquire lock on room directory";
    pub const ERR_STORE_LOCK: &str = "Failed to acquire lock on message store";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_OUTBOUND_FULL: &str = "Outbound queue full";
    pub const ERR_QUEUE_CLOSED: &str = "Incoming message queue closed";

    /// Handshake errors
    pub const ERR_NIL_IDENTITY: &str = "Nil identifier is not a valid client identity";

    /// Callback faults
    pub const ERR_UNKNOWN_PANIC: &str = "callback panicked with a non-string payload";
}

/// ProtocolError is the primary error type for all transport operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Read timed out")]
    Timeout,

    #[error("Too much incomplete data buffered: {size} bytes (limit {limit})")]
    IncompleteDataTooLarge { size: usize, limit: usize },

    #[error("Unrecognized format: {0} bytes is not enough for a message tag")]
    UnrecognizedFormat(usize),

    #[error("Unsupported message type: {0}")]
    UnsupportedMessageType(u32),

    #[error("Incomplete message: need {needed} bytes, have {available}")]
    IncompleteMessage { needed: usize, available: usize },

    #[error("Invalid message content: {0}")]
    InvalidContent(String),

    #[error("Message too large: {0} bytes")]
    OversizedMessage(usize),

    #[error("Handshake timed out before any identity bytes arrived")]
    HandshakeTimeout,

    #[error("Incomplete handshake: received {0} of 16 identity bytes")]
    IncompleteHandshake(usize),

    #[error("Handshake failed: {0}")]
    HandshakeFailure(String),

    #[error("Already listening")]
    AlreadyListening,

    #[error("Client {0} already registered")]
    AlreadyRegistered(ClientId),

    #[error("Connection limit of {0} clients reached")]
    ConnectionLimitReached(usize),

    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Routing failed: {0}")]
    RoutingError(String),

    #[error("Persistence failed: {0}")]
    PersistenceError(String),

    #[error("Callback panicked: {0}")]
    CallbackPanic(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// True when a decode failed only because more bytes are needed.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnrecognizedFormat(_) | ProtocolError::IncompleteMessage { .. }
        )
    }

    /// True for errors the listener retries instead of tearing the connection down.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProtocolError::Timeout)
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_classification() {
        assert!(ProtocolError::UnrecognizedFormat(3).is_incomplete());
        assert!(ProtocolError::IncompleteMessage {
            needed: 40,
            available: 20
        }
        .is_incomplete());
        assert!(!ProtocolError::UnsupportedMessageType(9).is_incomplete());
        assert!(!ProtocolError::Timeout.is_incomplete());
    }

    #[test]
    fn only_timeout_is_transient() {
        assert!(ProtocolError::Timeout.is_transient());
        assert!(!ProtocolError::ConnectionClosed.is_transient());
        assert!(!ProtocolError::IncompleteDataTooLarge { size: 10, limit: 5 }.is_transient());
    }
}
