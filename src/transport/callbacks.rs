//! Callback traits through which the acceptor and listeners report events.
//!
//! Every method has a permissive default, so implementors override only the
//! events they care about. All callbacks run inside a fault boundary: a panic
//! is reported through `on_panic` instead of killing the calling task.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use crate::core::id::ClientId;
use crate::error::{ProtocolError, Result};
use crate::transport::listener::ConnectionListener;

/// Outcome of the connect callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectDecision {
    /// Start a listener for the connection under this identity.
    Accept(ClientId),
    /// Close the connection.
    Deny,
}

/// Result of handing buffered bytes to [`ListenerHandler::on_read_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes to drop from the front of the buffer.
    pub consumed: usize,
    /// `false` closes the connection once the callback returns.
    pub keep_alive: bool,
}

impl ReadOutcome {
    pub fn keep(consumed: usize) -> Self {
        Self {
            consumed,
            keep_alive: true,
        }
    }

    pub fn close(consumed: usize) -> Self {
        Self {
            consumed,
            keep_alive: false,
        }
    }
}

/// Two-phase connect callbacks, invoked by the acceptor.
pub trait ConnectHandler: Send + Sync + 'static {
    /// Inspect a new connection and decide whether to accept it.
    ///
    /// The raw stream is available for a handshake before any framing.
    fn on_connect<'a>(
        &'a self,
        _stream: &'a mut TcpStream,
        _peer: SocketAddr,
    ) -> BoxFuture<'a, ConnectDecision> {
        Box::pin(async { ConnectDecision::Accept(ClientId::new()) })
    }

    /// Take ownership of a running listener. An error closes it.
    fn on_accepted(&self, _listener: Arc<ConnectionListener>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// A connect callback panicked.
    fn on_panic<'a>(&'a self, error: &'a ProtocolError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            error!(error = %error, "Connect callback panicked");
        })
    }
}

/// Per-connection callbacks, invoked from the listener task.
///
/// Implementations must not call [`ConnectionListener::close`] on the
/// listener that is invoking them; that waits for the calling task and never
/// returns.
pub trait ListenerHandler: Send + Sync + 'static {
    /// Bytes are buffered. `data` holds everything not yet consumed.
    fn on_read_data<'a>(&'a self, _client: ClientId, _data: &'a [u8]) -> BoxFuture<'a, ReadOutcome> {
        Box::pin(async { ReadOutcome::keep(0) })
    }

    /// The peer closed the stream.
    fn on_disconnect(&self, client: ClientId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            debug!(client = %client, "Client disconnected");
        })
    }

    /// A read failed for a reason other than disconnect or timeout.
    fn on_read_error<'a>(&'a self, client: ClientId, error: &'a ProtocolError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            warn!(client = %client, error = %error, "Read failed");
        })
    }

    /// A listener callback panicked.
    fn on_panic<'a>(&'a self, client: ClientId, error: &'a ProtocolError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            error!(client = %client, error = %error, "Listener callback panicked");
        })
    }
}
