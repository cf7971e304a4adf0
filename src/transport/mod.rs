//! # Transport Layer
//!
//! TCP connection acceptance and per-connection listener tasks.
//!
//! ## Components
//! - **Acceptor**: binds a port and runs connect callbacks per connection
//! - **Listener**: drives one framed connection in its own task
//! - **Callbacks**: traits through which both report events
//!
//! ## Shutdown
//! Cancellation is cooperative throughout: closers set a token and then
//! wait for the affected tasks to finish. No task is aborted.

pub mod acceptor;
pub mod callbacks;
pub mod listener;

pub use acceptor::ConnectionAcceptor;
pub use callbacks::{ConnectDecision, ConnectHandler, ListenerHandler, ReadOutcome};
pub use listener::ConnectionListener;
