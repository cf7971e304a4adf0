//! # Protocol Layer
//!
//! Connection handshake and client message dispatch.
//!
//! ## Components
//! - **Handshake**: 16-byte client identity exchange before framing begins
//! - **Dispatcher**: client registry with broadcast and targeted delivery

pub mod dispatcher;
pub mod handshake;

#[cfg(test)]
mod tests;
