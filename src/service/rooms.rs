//! Room membership lookup used to fan out room messages.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use futures::future::BoxFuture;
use tracing::debug;

use crate::core::id::{ClientId, RoomId};
use crate::error::{constants, ProtocolError, Result};

/// Resolves which clients participate in a room.
pub trait RoomDirectory: Send + Sync + 'static {
    /// Current participants of `room`.
    ///
    /// # Errors
    /// `RoomNotFound` if the room does not exist.
    fn members(&self, room: RoomId) -> BoxFuture<'_, Result<Vec<ClientId>>>;

    /// A client left the server; drop any membership state it holds.
    fn client_disconnected(&self, _client: ClientId) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Process-local room directory.
///
/// A room exists from its first `join` until it is explicitly removed;
/// empty rooms are kept.
#[derive(Debug, Default)]
pub struct InMemoryRoomDirectory {
    rooms: RwLock<HashMap<RoomId, HashSet<ClientId>>>,
}

impl InMemoryRoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty room. Returns `false` if it already existed.
    pub fn create_room(&self, room: RoomId) -> Result<bool> {
        let mut rooms = self.write()?;
        if rooms.contains_key(&room) {
            return Ok(false);
        }
        rooms.insert(room, HashSet::new());
        Ok(true)
    }

    /// Add `client` to `room`, creating the room if needed.
    pub fn join(&self, room: RoomId, client: ClientId) -> Result<()> {
        self.write()?.entry(room).or_default().insert(client);
        debug!(room = %room, client = %client, "Joined room");
        Ok(())
    }

    /// Remove `client` from `room`. Returns whether it was a member.
    pub fn leave(&self, room: RoomId, client: ClientId) -> Result<bool> {
        let mut rooms = self.write()?;
        let members = rooms
            .get_mut(&room)
            .ok_or_else(|| ProtocolError::RoomNotFound(room.to_string()))?;
        Ok(members.remove(&client))
    }

    /// Delete a room and its memberships.
    pub fn remove_room(&self, room: RoomId) -> Result<bool> {
        Ok(self.write()?.remove(&room).is_some())
    }

    /// Remove `client` from every room it joined.
    pub fn remove_client(&self, client: ClientId) -> Result<usize> {
        let mut rooms = self.write()?;
        let mut left = 0;
        for members in rooms.values_mut() {
            if members.remove(&client) {
                left += 1;
            }
        }
        Ok(left)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<RoomId, HashSet<ClientId>>>> {
        self.rooms
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_ROOMS_LOCK.to_string()))
    }
}

impl RoomDirectory for InMemoryRoomDirectory {
    fn members(&self, room: RoomId) -> BoxFuture<'_, Result<Vec<ClientId>>> {
        Box::pin(async move {
            let rooms = self
                .rooms
                .read()
                .map_err(|_| ProtocolError::Custom(constants::ERR_ROOMS_LOCK.to_string()))?;
            rooms
                .get(&room)
                .map(|members| members.iter().copied().collect())
                .ok_or_else(|| ProtocolError::RoomNotFound(room.to_string()))
        })
    }

    fn client_disconnected(&self, client: ClientId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Ok(left) = self.remove_client(client) {
                if left > 0 {
                    debug!(client = %client, rooms = left, "Removed client from rooms");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn members_reflect_joins_and_leaves() {
        let directory = InMemoryRoomDirectory::new();
        let room = RoomId::new();
        let a = ClientId::new();
        let b = ClientId::new();

        directory.join(room, a).unwrap();
        directory.join(room, b).unwrap();
        assert!(directory.leave(room, a).unwrap());

        assert_eq!(directory.members(room).await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn unknown_room_is_an_error() {
        let directory = InMemoryRoomDirectory::new();
        assert!(matches!(
            directory.members(RoomId::new()).await,
            Err(ProtocolError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn disconnect_clears_every_membership() {
        let directory = InMemoryRoomDirectory::new();
        let first = RoomId::new();
        let second = RoomId::new();
        let client = ClientId::new();
        directory.join(first, client).unwrap();
        directory.join(second, client).unwrap();

        directory.client_disconnected(client).await;

        assert!(directory.members(first).await.unwrap().is_empty());
        assert!(directory.members(second).await.unwrap().is_empty());
        assert!(!directory.create_room(first).unwrap());
    }
}
