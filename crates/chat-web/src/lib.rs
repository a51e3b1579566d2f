//! # chat-web
//!
//! HTTP API and static frontend serving for the chat server.
//!
//! ## Architecture
//!
//! The web layer is built on Axum:
//!
//! - `/api/chat/` - identity, message submission and delivery
//! - everything else - static files from the configured web root
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chat_web::{create_router, ServerState};
//!
//! let state = Arc::new(ServerState::new(hub, DeliveryMode::Push));
//! let app = create_router(state);
//!
//! let listener = TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

pub mod error;
pub mod routes;

// Re-exports
pub use error::ApiError;
pub use routes::create_router;

use std::path::PathBuf;
use std::sync::Arc;

use chat_core::DeliveryMode;
use chat_server::ChatHub;

/// Shared server state for all route handlers.
pub struct ServerState {
    pub hub: Arc<ChatHub>,
    /// Which delivery endpoint is mounted.
    pub delivery: DeliveryMode,
    /// Static frontend directory.
    pub web_root: Option<PathBuf>,
}

impl ServerState {
    pub fn new(hub: Arc<ChatHub>, delivery: DeliveryMode) -> Self {
        Self {
            hub,
            delivery,
            web_root: None,
        }
    }

    pub fn with_web_root(mut self, web_root: impl Into<PathBuf>) -> Self {
        self.web_root = Some(web_root.into());
        self
    }
}

/// Type alias for shared state in Axum handlers.
pub type AppState = Arc<ServerState>;
