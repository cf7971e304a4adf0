//! # Binary Message Codec
//!
//! Encodes and decodes [`Message`] values to and from the chat wire format.
//!
//! ## Wire Format
//! All integers are little-endian.
//! ```text
//! [Tag(4)]
//! tag 0 ClientConnected:    [Client(16)]
//! tag 1 ClientDisconnected: [Client(16)]
//! tag 2 DirectMessage:      [Emitter(16)] [Receiver(16)] [Len(4)] [Content(Len), UTF-8]
//! tag 3 RoomMessage:        [Emitter(16)] [Room(16)]     [Len(4)] [Content(Len), UTF-8]
//! ```
//!
//! [`decode`] reads exactly one message from the front of a buffer and reports
//! how many bytes it consumed, so callers can discard just that prefix and keep
//! whatever follows (the start of the next message, or garbage). When the
//! buffer holds only part of a message the error satisfies
//! [`ProtocolError::is_incomplete`] and the caller retries once more bytes
//! arrive.
//!
//! [`MessageCodec`] wraps the same format as a `tokio_util` codec for use with
//! `Framed` streams.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::id::{ClientId, RoomId, IDENTITY_LEN};
use crate::core::message::{Message, MessageType};
use crate::error::{ProtocolError, Result};

/// Size of the message-type tag
pub const TAG_LEN: usize = 4;

/// Size of the content-length prefix in text messages
pub const CONTENT_LEN_LEN: usize = 4;

/// Encoded size of a connect/disconnect notification
pub const NOTIFICATION_LEN: usize = TAG_LEN + IDENTITY_LEN;

/// Encoded size of a text message before its content
pub const TEXT_HEADER_LEN: usize = TAG_LEN + 2 * IDENTITY_LEN + CONTENT_LEN_LEN;

/// Number of bytes `message` occupies on the wire.
pub fn encoded_len(message: &Message) -> usize {
    match message {
        Message::ClientConnected { .. } | Message::ClientDisconnected { .. } => NOTIFICATION_LEN,
        Message::DirectMessage { content, .. } | Message::RoomMessage { content, .. } => {
            TEXT_HEADER_LEN + content.len()
        }
    }
}

/// Encode a message into a fresh buffer.
///
/// # Errors
/// Returns `ProtocolError::OversizedMessage` if the content length does not
/// fit the 4-byte length prefix.
pub fn encode(message: &Message) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(encoded_len(message));
    encode_into(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Append the encoding of `message` to `dst`.
pub fn encode_into(message: &Message, dst: &mut BytesMut) -> Result<()> {
    // Checked up front so a failed encode leaves `dst` untouched
    if let Some(content) = message.content() {
        if u32::try_from(content.len()).is_err() {
            return Err(ProtocolError::OversizedMessage(content.len()));
        }
    }

    dst.reserve(encoded_len(message));
    dst.put_u32_le(message.message_type().as_u32());

    match message {
        Message::ClientConnected { client } | Message::ClientDisconnected { client } => {
            dst.put_slice(client.as_bytes());
        }
        Message::DirectMessage {
            emitter,
            receiver,
            content,
        } => {
            put_text(dst, emitter.as_bytes(), receiver.as_bytes(), content);
        }
        Message::RoomMessage {
            emitter,
            room,
            content,
        } => {
            put_text(dst, emitter.as_bytes(), room.as_bytes(), content);
        }
    }

    Ok(())
}

fn put_text(
    dst: &mut BytesMut,
    emitter: &[u8; IDENTITY_LEN],
    target: &[u8; IDENTITY_LEN],
    content: &str,
) {
    dst.put_slice(emitter);
    dst.put_slice(target);
    dst.put_u32_le(content.len() as u32);
    dst.put_slice(content.as_bytes());
}

/// Decode one message from the front of `src`.
///
/// Returns the message and the number of bytes it occupied. Bytes past that
/// point are never inspected beyond what the declared lengths require.
///
/// # Errors
/// - `UnrecognizedFormat` if fewer than 4 bytes are available for the tag
/// - `UnsupportedMessageType` for an unknown tag
/// - `IncompleteMessage` if the declared lengths exceed the available bytes
/// - `InvalidContent` if the content is not valid UTF-8
pub fn decode(src: &[u8]) -> Result<(Message, usize)> {
    if src.len() < TAG_LEN {
        return Err(ProtocolError::UnrecognizedFormat(src.len()));
    }

    let tag = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
    let kind = MessageType::try_from(tag)?;

    match kind {
        MessageType::ClientConnected | MessageType::ClientDisconnected => {
            require(src, NOTIFICATION_LEN)?;
            let client = ClientId::from_bytes(read_identity(src, TAG_LEN));
            let message = if kind == MessageType::ClientConnected {
                Message::ClientConnected { client }
            } else {
                Message::ClientDisconnected { client }
            };
            Ok((message, NOTIFICATION_LEN))
        }
        MessageType::DirectMessage | MessageType::RoomMessage => {
            require(src, TEXT_HEADER_LEN)?;
            let emitter = ClientId::from_bytes(read_identity(src, TAG_LEN));
            let target = read_identity(src, TAG_LEN + IDENTITY_LEN);

            let len_at = TAG_LEN + 2 * IDENTITY_LEN;
            let content_len = u32::from_le_bytes([
                src[len_at],
                src[len_at + 1],
                src[len_at + 2],
                src[len_at + 3],
            ]) as usize;

            let total = TEXT_HEADER_LEN
                .checked_add(content_len)
                .ok_or(ProtocolError::OversizedMessage(content_len))?;
            require(src, total)?;

            let content = std::str::from_utf8(&src[TEXT_HEADER_LEN..total])
                .map_err(|e| ProtocolError::InvalidContent(e.to_string()))?
                .to_owned();

            let message = if kind == MessageType::DirectMessage {
                Message::DirectMessage {
                    emitter,
                    receiver: ClientId::from_bytes(target),
                    content,
                }
            } else {
                Message::RoomMessage {
                    emitter,
                    room: RoomId::from_bytes(target),
                    content,
                }
            };
            Ok((message, total))
        }
    }
}

#[inline]
fn require(src: &[u8], needed: usize) -> Result<()> {
    if src.len() < needed {
        return Err(ProtocolError::IncompleteMessage {
            needed,
            available: src.len(),
        });
    }
    Ok(())
}

#[inline]
fn read_identity(src: &[u8], at: usize) -> [u8; IDENTITY_LEN] {
    let mut id = [0u8; IDENTITY_LEN];
    id.copy_from_slice(&src[at..at + IDENTITY_LEN]);
    id
}

/// Tokio codec over the chat wire format.
///
/// Frames larger than `max_message_size` are rejected as soon as their
/// declared length is known, before the content is buffered.
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_message_size: usize,
}

impl MessageCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(crate::config::MAX_INCOMPLETE_SIZE)
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        match decode(src) {
            Ok((message, consumed)) => {
                src.advance(consumed);
                Ok(Some(message))
            }
            Err(ProtocolError::IncompleteMessage { needed, available }) => {
                if needed > self.max_message_size {
                    return Err(ProtocolError::OversizedMessage(needed));
                }
                src.reserve(needed - available);
                Ok(None)
            }
            Err(e) if e.is_incomplete() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let size = encoded_len(&item);
        if size > self.max_message_size {
            return Err(ProtocolError::OversizedMessage(size));
        }
        encode_into(&item, dst)
    }
}
