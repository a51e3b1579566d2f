//! HTTP and stream message types.
//!
//! - REST: identity, message submission, poll responses, errors
//! - Stream: the events pushed over `text/event-stream`

use std::fmt;
use std::sync::Arc;

use chat_core::ChatMessage;
use serde::{Deserialize, Serialize};

/// Response of `GET /api/chat/uuid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub id: String,
}

/// Body of `POST /api/chat/message`.
///
/// Fields are optional so a missing one is reported as a bad request rather
/// than a decode failure with a framework-specific message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    #[serde(default, alias = "uuid")]
    pub id: Option<String>,
    #[serde(default, alias = "username")]
    pub display_name: Option<String>,
    #[serde(default, alias = "message")]
    pub body: Option<String>,
}

impl PostMessageRequest {
    /// `(id, display_name, body)` if all three are present.
    pub fn into_fields(self) -> Option<(String, String, String)> {
        Some((self.id?, self.display_name?, self.body?))
    }
}

/// Response of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageResponse {
    pub status: String,
    pub created_at: u32,
}

impl PostMessageResponse {
    pub fn success(created_at: u32) -> Self {
        Self {
            status: "success".to_string(),
            created_at,
        }
    }
}

/// Query of `GET /api/chat/messages`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SinceQuery {
    #[serde(default)]
    pub since_timestamp: u32,
}

/// Poll response. Field names are snake_case for existing clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesSinceResponse {
    pub messages: Vec<ChatMessage>,
    pub server_time: u32,
    pub has_new_messages: bool,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Why the server ended a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    #[serde(rename = "max lifetime reached")]
    LifetimeExpired,
    #[serde(rename = "client unreachable")]
    ProbeFailed,
    #[serde(rename = "send failed")]
    SendFailed,
    #[serde(rename = "unregistered")]
    Unregistered,
    #[serde(rename = "server shutting down")]
    ServerShutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::LifetimeExpired => "max lifetime reached",
            CloseReason::ProbeFailed => "client unreachable",
            CloseReason::SendFailed => "send failed",
            CloseReason::Unregistered => "unregistered",
            CloseReason::ServerShutdown => "server shutting down",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a `close` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseNotice {
    pub reason: CloseReason,
}

/// An event pushed to a streaming client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Initial backlog: an already rendered JSON array of messages.
    Messages(Arc<str>),
    /// A single new message.
    Message(ChatMessage),
    /// Keep-alive.
    Ping,
    /// The server is ending the stream.
    Close(CloseReason),
}

impl StreamEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Messages(_) => "messages",
            StreamEvent::Message(_) => "message",
            StreamEvent::Ping => "ping",
            StreamEvent::Close(_) => "close",
        }
    }
}
