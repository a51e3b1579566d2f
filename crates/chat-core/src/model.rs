//! Chat data model types.
//!
//! A chat room holds a bounded history of [`ChatMessage`]s. Identifiers and
//! display names are supplied by clients and are only checked for presence
//! and length; the server owns the timestamp.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Default number of messages kept by the store.
pub const DEFAULT_CAPACITY: usize = 100;

/// Maximum identifier length in bytes (canonical hyphenated UUID).
pub const MAX_ID_LEN: usize = 36;

/// Maximum display name length in bytes.
pub const MAX_DISPLAY_NAME_LEN: usize = 31;

/// Maximum message body length in bytes.
pub const MAX_BODY_LEN: usize = 150;

/// Maximum accepted size of a message submission request body.
pub const MAX_REQUEST_BODY: usize = 4096;

/// A single chat message.
///
/// Serialized as `{"id","displayName","body","createdAt"}`. The legacy field
/// names (`uuid`, `username`, `message`, `timestamp`) are accepted when
/// decoding so older persisted entries still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Client identifier of the author.
    #[serde(alias = "uuid")]
    pub id: String,

    /// Display name chosen by the author.
    #[serde(alias = "username")]
    pub display_name: String,

    /// Message text.
    #[serde(alias = "message")]
    pub body: String,

    /// Server-assigned creation time (epoch seconds).
    ///
    /// Unique and increasing within a store. A burst of posts in one second
    /// takes the following seconds, so during bursts this can run ahead of
    /// the wall clock by up to the number of messages in the burst.
    #[serde(alias = "timestamp")]
    pub created_at: u32,
}

impl ChatMessage {
    /// Check that the client-supplied fields are present and within limits.
    pub fn validate_fields(id: &str, display_name: &str, body: &str) -> Result<(), StoreError> {
        check_field("id", id, MAX_ID_LEN)?;
        check_field("displayName", display_name, MAX_DISPLAY_NAME_LEN)?;
        check_field("body", body, MAX_BODY_LEN)?;
        Ok(())
    }

    /// Validate this message's fields.
    pub fn validate(&self) -> Result<(), StoreError> {
        Self::validate_fields(&self.id, &self.display_name, &self.body)
    }
}

fn check_field(name: &str, value: &str, max_len: usize) -> Result<(), StoreError> {
    if value.is_empty() {
        return Err(StoreError::InvalidArgument(format!("{name} must not be empty")));
    }
    if value.len() > max_len {
        return Err(StoreError::InvalidArgument(format!(
            "{name} exceeds {max_len} bytes"
        )));
    }
    Ok(())
}
