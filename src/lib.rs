//! # chat-transport
//!
//! TCP transport core for a real-time chat backend.
//!
//! ## Layers
//! - [`core`]: identities, messages, the binary codec and framed connections
//! - [`transport`]: connection acceptor, per-connection listener tasks, callbacks
//! - [`protocol`]: identity handshake and the client registry
//! - [`service`]: message processing, room and persistence collaborators,
//!   the assembled [`ChatServer`] and a [`ChatClient`]
//! - [`utils`]: logging, metrics, timeouts and the callback fault boundary
//!
//! ## Data Flow
//! ```text
//! Acceptor -> Listener -> decode -> incoming queue -> ProcessingService
//!          -> ClientRegistry -> Listener of the target -> encode -> socket
//! ```
//!
//! ## Quick Start
//! ```no_run
//! use chat_transport::{ChatConfig, ChatServer};
//!
//! # async fn run() -> chat_transport::Result<()> {
//! let server = ChatServer::bind(ChatConfig::default()).await?;
//! server.start().await?;
//! // ...
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::ChatConfig;
pub use crate::core::id::{ClientId, RoomId};
pub use crate::core::message::{Message, MessageType};
pub use error::{ProtocolError, Result};
pub use service::{ChatClient, ChatServer};
