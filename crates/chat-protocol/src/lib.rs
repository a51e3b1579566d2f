//! # chat-protocol
//!
//! Chat REST payloads and the Server-Sent Events codec.
//!
//! This crate defines the JSON bodies of the HTTP API and the typed events
//! pushed to streaming clients.

pub mod codec;
pub mod messages;

pub use codec::{encode_event, CodecError, EncodedEvent};
pub use messages::*;
