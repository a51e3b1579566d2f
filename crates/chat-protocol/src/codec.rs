//! Server-Sent Events codec.
//!
//! Each [`StreamEvent`] is serialized once into an [`EncodedEvent`] that can be
//! cloned cheaply and handed to every connected client.

use std::sync::Arc;

use thiserror::Error;

use crate::messages::{CloseNotice, StreamEvent};

/// Errors that can occur during event encoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("Failed to serialize event: {0}")]
    SerializeError(#[from] serde_json::Error),
}

/// A serialized event, ready to write to any number of streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEvent {
    pub name: &'static str,
    /// Single-line JSON payload.
    pub data: Arc<str>,
}

/// Serialize an event.
pub fn encode_event(event: &StreamEvent) -> Result<EncodedEvent, CodecError> {
    let data: Arc<str> = match event {
        StreamEvent::Messages(rendered) => Arc::clone(rendered),
        StreamEvent::Message(message) => serde_json::to_string(message)?.into(),
        StreamEvent::Ping => Arc::from("{}"),
        StreamEvent::Close(reason) => {
            serde_json::to_string(&CloseNotice { reason: *reason })?.into()
        }
    };
    Ok(EncodedEvent {
        name: event.name(),
        data,
    })
}
