//! Message persistence ahead of room delivery.
//!
//! A room message is stored before it is fanned out, so anything a client
//! saw in a room is also in that room's history.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::core::id::RoomId;
use crate::core::message::Message;
use crate::error::{constants, ProtocolError, Result};

/// A message as recorded by a [`MessageStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Store-wide sequence number, starting at 1.
    pub sequence: u64,
    pub message: Message,
    /// Milliseconds since the Unix epoch at which the message was stored.
    pub created_at_ms: u64,
}

pub trait MessageStore: Send + Sync + 'static {
    /// Persist `message`.
    ///
    /// # Errors
    /// `PersistenceError` if the message could not be recorded.
    fn create<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<StoredMessage>>;
}

/// Messages kept per room by [`InMemoryMessageStore::new`].
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Default)]
struct StoreState {
    next_sequence: u64,
    by_room: HashMap<RoomId, VecDeque<StoredMessage>>,
    total: usize,
}

/// Process-local message store with a bounded per-room history.
///
/// Each room keeps its most recent `history_limit` messages; older ones are
/// evicted as new ones arrive. Sequence numbers keep counting regardless.
#[derive(Debug)]
pub struct InMemoryMessageStore {
    state: Mutex<StoreState>,
    history_limit: usize,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Keep at most `limit` messages per room (at least one).
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            history_limit: limit.max(1),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Retained messages of `room`, oldest first.
    pub fn history(&self, room: RoomId) -> Result<Vec<StoredMessage>> {
        let state = self.lock()?;
        Ok(state
            .by_room
            .get(&room)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Number of messages retained across all rooms.
    pub fn len(&self) -> usize {
        self.lock().map(|state| state.total).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| ProtocolError::PersistenceError(constants::ERR_STORE_LOCK.to_string()))
    }
}

impl MessageStore for InMemoryMessageStore {
    fn create<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<StoredMessage>> {
        Box::pin(async move {
            let room = match message {
                Message::RoomMessage { room, .. } => *room,
                other => {
                    return Err(ProtocolError::PersistenceError(format!(
                        "only room messages are stored, got {}",
                        other.message_type()
                    )))
                }
            };

            let created_at_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .map_err(|e| ProtocolError::PersistenceError(e.to_string()))?;

            let mut state = self.lock()?;
            state.next_sequence += 1;
            let stored = StoredMessage {
                sequence: state.next_sequence,
                message: message.clone(),
                created_at_ms,
            };
            let history = state.by_room.entry(room).or_default();
            history.push_back(stored.clone());
            let evicted = history.len().saturating_sub(self.history_limit);
            history.drain(..evicted);
            state.total = state.total + 1 - evicted;
            Ok(stored)
        })
    }
}
