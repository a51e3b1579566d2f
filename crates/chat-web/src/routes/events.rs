//! Push delivery over Server-Sent Events.
//!
//! ### `GET /api/chat/events`
//!
//! Opens a `text/event-stream`. The first event is `messages` with the full
//! history, followed by `message` for each new post, `ping` every 10 s and a
//! final `close` carrying the reason. Every event carries a `retry` hint.
//! Returns 503 when the streaming client limit is reached.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use chat_server::stream;
use futures::{Stream, StreamExt};

use super::chat::run_blocking;
use crate::error::ApiError;
use crate::AppState;

/// Handler for `GET /api/chat/events`.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let hub = state.hub.clone();
    let events = run_blocking(move || Ok(stream::open(&hub)?)).await?;
    let retry = state.hub.timings().retry;

    let sse = events.map(move |event| {
        Ok(Event::default()
            .event(event.name)
            .data(&*event.data)
            .retry(retry))
    });
    Ok(Sse::new(sse))
}
