//! # Service Layer
//!
//! Chat-level services built on the transport and protocol layers.
//!
//! ## Components
//! - **Chat**: server wiring and the connection lifecycle callbacks
//! - **Client**: framed client for the chat wire format
//! - **Processing**: single consumer routing queued messages
//! - **Rooms**: room membership directory
//! - **Persistence**: message store for room history

pub mod chat;
pub mod client;
pub mod persistence;
pub mod processing;
pub mod rooms;

pub use chat::{ChatConnectionHandler, ChatServer};
pub use client::ChatClient;
pub use persistence::{InMemoryMessageStore, MessageStore, StoredMessage};
pub use processing::{MessageRouter, ProcessingService};
pub use rooms::{InMemoryRoomDirectory, RoomDirectory};
