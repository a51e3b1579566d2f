//! HTTP route handlers for the chat server.

pub mod chat;
pub mod events;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use chat_core::{DeliveryMode, MAX_REQUEST_BODY};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::AppState;

/// Create the main Axum router with all routes.
///
/// Routes are organized as:
/// - `/api/chat/` - chat API; only the delivery endpoint for the configured
///   mode is mounted
/// - fallback - static frontend files, when a web root is configured
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new().nest("/api/chat", chat_routes(state.delivery));

    if let Some(root) = &state.web_root {
        router = router.fallback_service(ServeDir::new(root));
    }

    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Create `/api/chat` routes.
fn chat_routes(delivery: DeliveryMode) -> Router<AppState> {
    let routes = Router::new()
        .route("/uuid", get(chat::issue_identity))
        .route("/message", post(chat::post_message));

    match delivery {
        DeliveryMode::Pull => routes.route("/messages", get(chat::messages_since)),
        DeliveryMode::Push => routes.route("/events", get(events::stream_events)),
    }
}
