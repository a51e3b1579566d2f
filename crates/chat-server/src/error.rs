//! Delivery layer errors.

use chat_core::StoreError;
use chat_protocol::CodecError;
use thiserror::Error;

use crate::registry::ClientId;

/// Errors returned by the client registry and the hub's stream operations.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The registry already holds the maximum number of streams.
    #[error("Too many streaming clients (max {max_clients})")]
    CapacityExceeded { max_clients: usize },

    /// The registry lock could not be acquired in time.
    #[error("Server busy, try again later")]
    Busy,

    /// The client is not (or no longer) registered.
    #[error("Unknown streaming client {0}")]
    UnknownClient(ClientId),

    /// Writing to the client failed; it has been removed.
    #[error("Failed to deliver to {0}")]
    SendFailed(ClientId),

    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a sink refused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The peer is gone.
    #[error("connection closed")]
    Closed,
    /// The peer is not draining its buffer.
    #[error("send buffer full")]
    Full,
}
