//! # chat-server
//!
//! Delivery layer for the chat service.
//!
//! - [`ClientRegistry`]: bounded set of streaming clients with one removal path
//! - [`StreamSession`]: per-connection lifecycle (probe, ping, close)
//! - [`ChatHub`]: the application context handed to request handlers
//!
//! Enable features based on target platform:
//! - `tokio-runtime` (default) - channel-backed streams for Linux/desktop

pub mod error;
pub mod hub;
pub mod registry;
pub mod session;
#[cfg(feature = "tokio-runtime")]
pub mod stream;

pub use chat_core::{ChatMessage, MessageStore};
pub use error::{DeliveryError, SinkError};
pub use hub::ChatHub;
pub use registry::{
    BroadcastReport, ClientId, ClientRegistry, EventSink, Liveness, RegistryConfig,
};
pub use session::{SessionAction, SessionState, StreamSession, StreamTimings};
#[cfg(feature = "tokio-runtime")]
pub use stream::{ChannelSink, EventStream};
