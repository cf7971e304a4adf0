//! # Connection Acceptor
//!
//! Listens on a TCP port and hands every incoming connection to a
//! [`ConnectHandler`] in its own task, so a slow handshake never delays the
//! next accept.
//!
//! ## Lifecycle
//! 1. [`ConnectionAcceptor::bind`] binds immediately; bind failures surface here
//! 2. [`ConnectionAcceptor::accept`] runs the accept loop until closed
//! 3. [`ConnectionAcceptor::close`] stops accepting and waits for the loop and
//!    every in-flight connect callback to finish
//!
//! Accepted connections are wrapped in a [`FramedConnection`] and driven by a
//! [`ConnectionListener`], which is handed to `on_accepted` while still
//! paused. The listener starts reading once that callback succeeds; if it
//! fails the listener is closed again without having read a byte.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::config::TransportConfig;
use crate::core::framed::FramedConnection;
use crate::error::{ProtocolError, Result};
use crate::transport::callbacks::{ConnectDecision, ConnectHandler, ListenerHandler};
use crate::transport::listener::ConnectionListener;
use crate::utils::fault;
use crate::utils::metrics::global_metrics;

/// Pause after a failed accept (e.g. file descriptor exhaustion)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub struct ConnectionAcceptor {
    socket: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    connect: Arc<dyn ConnectHandler>,
    listen: Arc<dyn ListenerHandler>,
    transport: TransportConfig,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl ConnectionAcceptor {
    /// Bind the listening socket.
    #[instrument(skip(addr, connect, listen, transport))]
    pub async fn bind<A>(
        addr: A,
        connect: Arc<dyn ConnectHandler>,
        listen: Arc<dyn ListenerHandler>,
        transport: TransportConfig,
    ) -> Result<Self>
    where
        A: ToSocketAddrs,
    {
        let socket = TcpListener::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        info!(address = %local_addr, "Acceptor bound");

        Ok(Self {
            socket: Mutex::new(Some(socket)),
            local_addr,
            connect,
            listen,
            transport,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until [`close`](Self::close) is called.
    ///
    /// # Errors
    /// `AlreadyListening` if the accept loop has already been started.
    pub async fn accept(&self) -> Result<()> {
        let socket = self
            .socket
            .lock()
            .map_err(|_| ProtocolError::Custom("Failed to acquire lock on acceptor socket".into()))?
            .take()
            .ok_or(ProtocolError::AlreadyListening)?;

        // Counts as a tracked task so close() also waits for this loop
        let _token = self.tasks.token();
        info!(address = %self.local_addr, "Accepting connections");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                accepted = socket.accept() => match accepted {
                    Ok((stream, peer)) => {
                        global_metrics().connection_accepted();
                        debug!(peer = %peer, "Connection accepted");
                        self.spawn_connect(stream, peer);
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(socket);
        info!(address = %self.local_addr, "Acceptor stopped");
        Ok(())
    }

    fn spawn_connect(&self, stream: TcpStream, peer: SocketAddr) {
        let connect = Arc::clone(&self.connect);
        let listen = Arc::clone(&self.listen);
        let transport = self.transport.clone();

        self.tasks
            .spawn(handle_connection(stream, peer, connect, listen, transport));
    }

    /// Stop accepting and wait for the accept loop and all connect tasks.
    pub async fn close(&self) {
        self.cancel.cancel();

        // accept() was never called: release the socket here
        if let Ok(mut socket) = self.socket.lock() {
            socket.take();
        }

        self.tasks.close();
        self.tasks.wait().await;
        debug!(address = %self.local_addr, "Acceptor closed");
    }
}

#[instrument(skip(stream, connect, listen, transport))]
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    connect: Arc<dyn ConnectHandler>,
    listen: Arc<dyn ListenerHandler>,
    transport: TransportConfig,
) {
    let decision = match fault::guard(async { connect.on_connect(&mut stream, peer).await }).await {
        Ok(decision) => decision,
        Err(panic) => {
            report_panic(&*connect, &panic).await;
            ConnectDecision::Deny
        }
    };

    let client = match decision {
        ConnectDecision::Accept(client) => client,
        ConnectDecision::Deny => {
            global_metrics().connection_denied();
            debug!("Connection denied");
            let _ = stream.shutdown().await;
            return;
        }
    };

    let framed = FramedConnection::new(
        stream,
        transport.read_timeout,
        transport.max_incomplete_size,
    );
    let listener = Arc::new(ConnectionListener::spawn_paused(
        client,
        framed,
        listen,
        transport.outbound_buffer,
    ));

    let handed_off = Arc::clone(&listener);
    match fault::guard(async { connect.on_accepted(handed_off).await }).await {
        Ok(Ok(())) => {
            listener.resume();
            debug!(client = %client, "Connection handed off");
        }
        Ok(Err(e)) => {
            warn!(client = %client, error = %e, "Accepted callback failed, closing listener");
            listener.close().await;
        }
        Err(panic) => {
            report_panic(&*connect, &panic).await;
            listener.close().await;
        }
    }
}

async fn report_panic(connect: &dyn ConnectHandler, panic: &ProtocolError) {
    if let Err(nested) = fault::guard(async { connect.on_panic(panic).await }).await {
        warn!(error = %nested, "Panic callback panicked");
    }
}
