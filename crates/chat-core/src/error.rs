//! Error types for the message store and durable storage.

use thiserror::Error;

/// Errors returned by [`MessageStore`](crate::store::MessageStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A required field is missing, empty or too long.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The store lock could not be acquired within the configured timeout.
    #[error("Server busy, try again later")]
    Busy,

    /// Allocating the output buffer failed.
    #[error("Server out of memory")]
    OutOfMemory,

    /// JSON rendering failed.
    #[error("Failed to render messages: {0}")]
    Render(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the caller may retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy | StoreError::OutOfMemory)
    }
}

/// Errors returned by durable key-value storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failed.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be decoded.
    #[error("Corrupt storage entry '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// The backend refused a write (full, read-only, key too long).
    #[error("Storage rejected write of '{key}': {reason}")]
    Rejected { key: String, reason: String },

    /// Encoding a value for storage failed.
    #[error("Failed to encode storage value: {0}")]
    Serialize(#[from] serde_json::Error),
}
