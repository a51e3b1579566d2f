//! Chat REST routes.
//!
//! # Endpoints
//!
//! ### `GET /api/chat/uuid`
//! Issues a fresh anonymous client identifier.
//!
//! ### `POST /api/chat/message`
//! Submits a message. The body is `{id, displayName, body}` and at most
//! 4096 bytes. Returns 201 with the server-assigned timestamp.
//!
//! ### `GET /api/chat/messages?since_timestamp=<t>`
//! Pull delivery: messages newer than `t` plus the cursor for the next poll.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chat_protocol::{IdentityResponse, PostMessageRequest, PostMessageResponse, SinceQuery};
use tracing::debug;

use crate::error::ApiError;
use crate::AppState;

/// Run store work off the async executor; lock waits and inline saves block.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("worker failed: {e}")))?
}

/// Handler for `GET /api/chat/uuid`.
pub async fn issue_identity(State(state): State<AppState>) -> Json<IdentityResponse> {
    Json(IdentityResponse {
        id: state.hub.issue_identity(),
    })
}

/// Handler for `POST /api/chat/message`.
pub async fn post_message(
    State(state): State<AppState>,
    payload: Result<Json<PostMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PostMessageResponse>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let (id, display_name, body) = request
        .into_fields()
        .ok_or_else(|| ApiError::bad_request("id, displayName and body are required"))?;

    let hub = state.hub.clone();
    let message =
        run_blocking(move || Ok(hub.post_message(&id, &display_name, &body)?)).await?;
    debug!(created_at = message.created_at, "message accepted");

    Ok((
        StatusCode::CREATED,
        Json(PostMessageResponse::success(message.created_at)),
    ))
}

/// Handler for `GET /api/chat/messages`.
///
/// The store renders the whole response object, so the JSON is passed
/// through unchanged.
pub async fn messages_since(
    State(state): State<AppState>,
    Query(query): Query<SinceQuery>,
) -> Result<Response, ApiError> {
    let hub = state.hub.clone();
    let rendering = run_blocking(move || Ok(hub.poll(query.since_timestamp)?)).await?;

    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        rendering.json,
    )
        .into_response())
}
