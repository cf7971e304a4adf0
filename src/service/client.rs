use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

use crate::core::codec::MessageCodec;
use crate::core::id::{ClientId, RoomId};
use crate::core::message::Message;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake;
use crate::utils::timeout::with_timeout_error;

/// Chat client speaking the binary message format over TCP.
pub struct ChatClient {
    id: ClientId,
    framed: Framed<TcpStream, MessageCodec>,
}

impl ChatClient {
    /// Connect with a freshly generated identity.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Self::connect_as(addr, ClientId::new()).await
    }

    /// Connect and announce `id` through the identity handshake.
    #[instrument(skip(addr))]
    pub async fn connect_as<A: ToSocketAddrs>(addr: A, id: ClientId) -> Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        handshake::send_client_id(&mut stream, id).await?;
        debug!(client = %id, "Connected");

        Ok(Self {
            id,
            framed: Framed::new(stream, MessageCodec::default()),
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Send any message as-is.
    pub async fn send(&mut self, message: Message) -> Result<()> {
        self.framed.send(message).await
    }

    /// Send `content` to one client.
    pub async fn send_direct(&mut self, receiver: ClientId, content: impl Into<String>) -> Result<()> {
        self.send(Message::DirectMessage {
            emitter: self.id,
            receiver,
            content: content.into(),
        })
        .await
    }

    /// Send `content` to a room.
    pub async fn send_to_room(&mut self, room: RoomId, content: impl Into<String>) -> Result<()> {
        self.send(Message::RoomMessage {
            emitter: self.id,
            room,
            content: content.into(),
        })
        .await
    }

    /// Receive the next message from the server.
    pub async fn receive(&mut self) -> Result<Message> {
        match self.framed.next().await {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(e),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Receive the next message, failing with `Timeout` after `wait`.
    pub async fn receive_timeout(&mut self, wait: Duration) -> Result<Message> {
        with_timeout_error(self.receive(), wait).await
    }

    /// Shut down the write side and drop the connection.
    pub async fn close(mut self) -> Result<()> {
        SinkExt::<Message>::close(&mut self.framed).await
    }
}
