//! The four message variants exchanged between clients and the server.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::id::{ClientId, RoomId};
use crate::error::{ProtocolError, Result};

/// Wire tag of each message variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum MessageType {
    ClientConnected = 0,
    ClientDisconnected = 1,
    DirectMessage = 2,
    RoomMessage = 3,
}

impl MessageType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Human-readable name used in log fields.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::ClientConnected => "client_connected",
            MessageType::ClientDisconnected => "client_disconnected",
            MessageType::DirectMessage => "direct_message",
            MessageType::RoomMessage => "room_message",
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = ProtocolError;

    fn try_from(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(MessageType::ClientConnected),
            1 => Ok(MessageType::ClientDisconnected),
            2 => Ok(MessageType::DirectMessage),
            3 => Ok(MessageType::RoomMessage),
            other => Err(ProtocolError::UnsupportedMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A chat protocol message. The tag fully determines the payload shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    ClientConnected {
        client: ClientId,
    },
    ClientDisconnected {
        client: ClientId,
    },
    DirectMessage {
        emitter: ClientId,
        receiver: ClientId,
        content: String,
    },
    RoomMessage {
        emitter: ClientId,
        room: RoomId,
        content: String,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ClientConnected { .. } => MessageType::ClientConnected,
            Message::ClientDisconnected { .. } => MessageType::ClientDisconnected,
            Message::DirectMessage { .. } => MessageType::DirectMessage,
            Message::RoomMessage { .. } => MessageType::RoomMessage,
        }
    }

    /// The client this message originates from or is about.
    pub fn origin(&self) -> ClientId {
        match self {
            Message::ClientConnected { client } | Message::ClientDisconnected { client } => *client,
            Message::DirectMessage { emitter, .. } | Message::RoomMessage { emitter, .. } => {
                *emitter
            }
        }
    }

    /// Connection lifecycle notifications are generated by the server only.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Message::ClientConnected { .. } | Message::ClientDisconnected { .. }
        )
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Message::DirectMessage { content, .. } | Message::RoomMessage { content, .. } => {
                Some(content)
            }
            _ => None,
        }
    }
}
