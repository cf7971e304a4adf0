//! 128-bit identities used on the wire.
//!
//! Clients and rooms are both addressed by 16-byte identifiers. They are
//! distinct types so a room id can never be passed where a client id is
//! expected, but share one definition through `identity_type!`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Width of every identity on the wire.
pub const IDENTITY_LEN: usize = 16;

macro_rules! identity_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identity.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub const fn from_bytes(bytes: [u8; IDENTITY_LEN]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
                self.0.as_bytes()
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<[u8; IDENTITY_LEN]> for $name {
            fn from(bytes: [u8; IDENTITY_LEN]) -> Self {
                Self::from_bytes(bytes)
            }
        }
    };
}

identity_type!(
    /// Identity of one connected client, stable for the lifetime of its connection.
    ClientId
);

identity_type!(
    /// Identity of a chat room.
    RoomId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_ne!(a, b);
        assert!(!a.is_nil());
    }

    #[test]
    fn bytes_round_trip() {
        let bytes = [7u8; IDENTITY_LEN];
        let room = RoomId::from_bytes(bytes);
        assert_eq!(room.as_bytes(), &bytes);
    }
}
