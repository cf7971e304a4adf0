//! # Core Protocol Components
//!
//! Identities, messages, the binary codec and the framed byte stream.
//!
//! ## Components
//! - **Id**: 16-byte client and room identities
//! - **Message**: the four wire variants
//! - **Codec**: partial-tolerant encode/decode plus a tokio codec
//! - **Framed**: timed reads into an accumulation buffer
//!
//! ## Wire Format
//! ```text
//! [Tag(4, LE)] [Payload determined by tag]
//! ```
//!
//! ## Security
//! - Buffered incomplete data is capped per connection
//! - Declared content lengths are checked against available bytes before use

pub mod codec;
pub mod framed;
pub mod id;
pub mod message;
