//! # Chat Server
//!
//! Wires the acceptor, client registry, processing service and the room and
//! persistence collaborators into one running server.
//!
//! ## Connection Lifecycle
//! 1. Connect: the identity handshake runs (or an identity is generated);
//!    connections beyond `max_connections` are denied
//! 2. Accept: the client is registered (bounded by `max_connections`) and
//!    `ClientConnected` is queued; only then does its listener start reading
//! 3. Read: complete frames are decoded and queued; a client may only send
//!    text messages in its own name
//! 4. Disconnect or read error: the client is unregistered, removed from its
//!    rooms and `ClientDisconnected` is queued
//!
//! A frame that fails to decode for any reason other than missing bytes
//! closes the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ChatConfig;
use crate::core::codec;
use crate::core::id::ClientId;
use crate::core::message::Message;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::{ClientRegistry, ClientSink};
use crate::protocol::handshake;
use crate::service::persistence::{InMemoryMessageStore, MessageStore};
use crate::service::processing::{MessageRouter, ProcessingService};
use crate::service::rooms::{InMemoryRoomDirectory, RoomDirectory};
use crate::transport::{
    ConnectDecision, ConnectHandler, ConnectionAcceptor, ConnectionListener, ListenerHandler,
    ReadOutcome,
};
use crate::utils::metrics::{global_metrics, Timer};
use crate::utils::timeout::with_timeout_error;

/// Registry entry for one connected client.
struct ClientSession {
    listener: Arc<ConnectionListener>,
    rooms: Arc<dyn RoomDirectory>,
}

impl ClientSink for ClientSession {
    fn deliver(&self, message: &Message) -> Result<()> {
        self.listener.send(message.clone())
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.listener.close())
    }

    fn disconnected(&self) -> BoxFuture<'_, ()> {
        self.rooms.client_disconnected(self.listener.client_id())
    }
}

/// Connect and per-connection callbacks of the chat server.
pub struct ChatConnectionHandler {
    registry: Arc<ClientRegistry>,
    rooms: Arc<dyn RoomDirectory>,
    incoming: mpsc::Sender<Message>,
    shutdown: CancellationToken,
    require_handshake: bool,
    handshake_timeout: Duration,
    max_connections: usize,
}

impl ChatConnectionHandler {
    /// Queue a message for processing. Gives up once the server shuts down.
    async fn enqueue(&self, message: Message) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            sent = self.incoming.send(message) => sent.is_ok(),
        }
    }

    /// Unregister `client` and announce its departure, once.
    async fn drop_client(&self, client: ClientId) {
        match self.registry.unregister(client) {
            Ok(Some(_)) => {
                self.rooms.client_disconnected(client).await;
                if !self.enqueue(Message::ClientDisconnected { client }).await {
                    debug!(client = %client, "Departure not queued, server shutting down");
                }
            }
            Ok(None) => {}
            Err(e) => error!(client = %client, error = %e, "Failed to unregister client"),
        }
    }

    /// Whether a message decoded from `client`'s connection may be processed.
    fn admissible(client: ClientId, message: &Message) -> bool {
        !message.is_control() && message.origin() == client
    }
}

impl ConnectHandler for ChatConnectionHandler {
    fn on_connect<'a>(
        &'a self,
        stream: &'a mut TcpStream,
        peer: SocketAddr,
    ) -> BoxFuture<'a, ConnectDecision> {
        Box::pin(async move {
            // Early refusal before the handshake; on_accepted enforces the limit
            match self.registry.client_count() {
                Ok(count) if count >= self.max_connections => {
                    warn!(peer = %peer, limit = self.max_connections, "Connection limit reached");
                    return ConnectDecision::Deny;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(peer = %peer, error = %e, "Registry unavailable, denying connection");
                    return ConnectDecision::Deny;
                }
            }

            if !self.require_handshake {
                return ConnectDecision::Accept(ClientId::new());
            }

            let metrics = global_metrics();
            metrics.handshake_attempt();
            match handshake::read_client_id(stream, self.handshake_timeout).await {
                Ok(client) => match self.registry.contains(client) {
                    Ok(false) => ConnectDecision::Accept(client),
                    Ok(true) => {
                        metrics.handshake_failed();
                        warn!(peer = %peer, client = %client, "Identity already connected");
                        ConnectDecision::Deny
                    }
                    Err(e) => {
                        error!(peer = %peer, error = %e, "Registry unavailable, denying connection");
                        ConnectDecision::Deny
                    }
                },
                Err(e) => {
                    metrics.handshake_failed();
                    warn!(peer = %peer, error = %e, "Handshake failed");
                    ConnectDecision::Deny
                }
            }
        })
    }

    fn on_accepted(&self, listener: Arc<ConnectionListener>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let client = listener.client_id();
            let session = Arc::new(ClientSession {
                listener,
                rooms: Arc::clone(&self.rooms),
            });
            self.registry
                .register_bounded(client, session, self.max_connections)?;
            info!(client = %client, clients = self.registry.len(), "Client connected");

            if !self.enqueue(Message::ClientConnected { client }).await {
                self.registry.unregister(client)?;
                return Err(ProtocolError::ConnectionClosed);
            }
            Ok(())
        })
    }
}

impl ListenerHandler for ChatConnectionHandler {
    fn on_read_data<'a>(&'a self, client: ClientId, data: &'a [u8]) -> BoxFuture<'a, ReadOutcome> {
        Box::pin(async move {
            let metrics = global_metrics();
            let mut consumed = 0;

            while consumed < data.len() {
                match codec::decode(&data[consumed..]) {
                    Ok((message, len)) => {
                        consumed += len;
                        metrics.message_received(len as u64);

                        if !Self::admissible(client, &message) {
                            metrics.message_rejected();
                            warn!(
                                client = %client,
                                kind = %message.message_type(),
                                origin = %message.origin(),
                                "Dropping message not sent in the client's own name"
                            );
                            continue;
                        }

                        if !self.enqueue(message).await {
                            return ReadOutcome::close(consumed);
                        }
                    }
                    Err(e) if e.is_incomplete() => break,
                    Err(e) => {
                        metrics.decode_error();
                        warn!(client = %client, error = %e, "Undecodable frame, closing connection");
                        self.drop_client(client).await;
                        return ReadOutcome::close(consumed);
                    }
                }
            }

            ReadOutcome::keep(consumed)
        })
    }

    fn on_disconnect(&self, client: ClientId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            info!(client = %client, "Client disconnected");
            self.drop_client(client).await;
        })
    }

    fn on_read_error<'a>(&'a self, client: ClientId, error: &'a ProtocolError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            warn!(client = %client, error = %error, "Connection failed");
            self.drop_client(client).await;
        })
    }
}

/// A chat server bound to a local address.
pub struct ChatServer {
    config: ChatConfig,
    registry: Arc<ClientRegistry>,
    processing: ProcessingService,
    acceptor: Arc<ConnectionAcceptor>,
    accept_task: Mutex<Option<JoinHandle<Result<()>>>>,
    shutdown: CancellationToken,
}

impl ChatServer {
    /// Bind with in-memory room and message collaborators.
    pub async fn bind(config: ChatConfig) -> Result<Self> {
        Self::bind_with(
            config,
            Arc::new(InMemoryRoomDirectory::new()),
            Arc::new(InMemoryMessageStore::new()),
        )
        .await
    }

    /// Bind the listening socket and build the server around the given collaborators.
    #[instrument(skip_all, fields(address = %config.server.address))]
    pub async fn bind_with(
        config: ChatConfig,
        rooms: Arc<dyn RoomDirectory>,
        store: Arc<dyn MessageStore>,
    ) -> Result<Self> {
        config.validate_strict()?;

        let registry = Arc::new(ClientRegistry::new());
        let (incoming, queue) = mpsc::channel(config.server.backpressure_limit);
        let shutdown = CancellationToken::new();

        let handler = Arc::new(ChatConnectionHandler {
            registry: Arc::clone(&registry),
            rooms: Arc::clone(&rooms),
            incoming,
            shutdown: shutdown.clone(),
            require_handshake: config.server.require_handshake,
            handshake_timeout: config.server.handshake_timeout,
            max_connections: config.server.max_connections,
        });

        let acceptor = ConnectionAcceptor::bind(
            config.server.address.as_str(),
            handler.clone(),
            handler,
            config.transport.clone(),
        )
        .await?;

        let router = MessageRouter::new(Arc::clone(&registry), rooms, store);
        let processing = ProcessingService::new(router, queue, config.processing.wait_timeout);

        Ok(Self {
            config,
            registry,
            processing,
            acceptor: Arc::new(acceptor),
            accept_task: Mutex::new(None),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    pub fn connected_clients(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// The consumer of the incoming queue; stopping it pauses routing while
    /// connections stay open.
    pub fn processing(&self) -> &ProcessingService {
        &self.processing
    }

    /// Start processing and accepting connections.
    pub async fn start(&self) -> Result<()> {
        let mut accept_task = self.accept_task.lock().await;
        if accept_task.is_some() {
            return Err(ProtocolError::AlreadyListening);
        }

        self.processing.start().await?;

        let acceptor = Arc::clone(&self.acceptor);
        *accept_task = Some(tokio::spawn(async move { acceptor.accept().await }));

        info!(address = %self.local_addr(), "Chat server started");
        Ok(())
    }

    /// Stop accepting, disconnect every client and stop processing.
    ///
    /// # Errors
    /// `Timeout` if teardown exceeds `server.shutdown_timeout`.
    pub async fn shutdown(&self) -> Result<()> {
        let _timer = Timer::start("chat_server_shutdown");
        self.shutdown.cancel();

        with_timeout_error(
            async {
                self.acceptor.close().await;
                if let Some(task) = self.accept_task.lock().await.take() {
                    match task.await {
                        Ok(Err(e)) => warn!(error = %e, "Accept loop ended with an error"),
                        Err(e) => error!(error = %e, "Accept task failed"),
                        Ok(Ok(())) => {}
                    }
                }

                self.registry.close().await?;
                self.processing.stop().await;
                Ok::<(), ProtocolError>(())
            },
            self.config.server.shutdown_timeout,
        )
        .await?;

        global_metrics().log_metrics();
        info!("Chat server shut down");
        Ok(())
    }
}
