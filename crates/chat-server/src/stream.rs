//! Tokio-backed event streams.
//!
//! Each open stream is a bounded mpsc channel. The registry holds the sending
//! half as an [`EventSink`]; the receiving half becomes the HTTP response
//! body. A spawned driver task runs the [`StreamSession`] timers.
//!
//! The stream ends when every sender is gone, which happens exactly when the
//! client leaves the registry.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chat_protocol::{encode_event, EncodedEvent, StreamEvent};
use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::{DeliveryError, SinkError};
use crate::hub::ChatHub;
use crate::registry::{ClientId, ClientRegistry, EventSink, Liveness};
use crate::session::{SessionAction, StreamSession, StreamTimings};

/// Events buffered per client before it counts as not draining.
pub const CHANNEL_DEPTH: usize = 32;

/// Registry-side half of a stream.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<EncodedEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<EncodedEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn send(&self, event: &EncodedEvent) -> Result<(), SinkError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    fn probe(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Removes the client when the response body is dropped.
struct DisconnectGuard {
    registry: ClientRegistry,
    id: ClientId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.registry.unregister(self.id) {
            debug!(client = %self.id, "stream dropped by transport");
        }
    }
}

/// The client-facing half of a stream.
pub struct EventStream {
    inner: ReceiverStream<EncodedEvent>,
    guard: DisconnectGuard,
}

impl EventStream {
    pub fn client_id(&self) -> ClientId {
        self.guard.id
    }
}

impl Stream for EventStream {
    type Item = EncodedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Open a stream: register, queue the backlog and start the session driver.
pub fn open(hub: &Arc<ChatHub>) -> Result<EventStream, DeliveryError> {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let id = hub.open_stream(Arc::new(ChannelSink::new(tx)))?;

    let registry = hub.registry().clone();
    tokio::spawn(drive(registry.clone(), id, *hub.timings()));

    Ok(EventStream {
        inner: ReceiverStream::new(rx),
        guard: DisconnectGuard { registry, id },
    })
}

/// Run the probe/ping/lifetime schedule for one client until it is removed.
async fn drive(registry: ClientRegistry, id: ClientId, timings: StreamTimings) {
    let started = Instant::now();
    let mut session = StreamSession::new(timings);
    session.mark_registered();

    let ping = match encode_event(&StreamEvent::Ping) {
        Ok(ping) => ping,
        Err(e) => {
            warn!(client = %id, error = %e, "cannot encode ping, dropping stream");
            registry.unregister(id);
            return;
        }
    };

    loop {
        let elapsed = started.elapsed();
        match session.poll(elapsed) {
            SessionAction::Wait(delay) => sleep(delay).await,
            SessionAction::Probe => match registry.probe(id) {
                Ok(Liveness::Alive) => session.record_probe(elapsed, true),
                Ok(Liveness::Dead) => session.record_probe(elapsed, false),
                Ok(Liveness::Unregistered) => session.finish(),
                // Registry contended; treat as alive and try again next tick.
                Err(_) => session.record_probe(elapsed, true),
            },
            SessionAction::Ping => match registry.send_to(id, &ping) {
                Ok(()) => session.record_ping(elapsed, true),
                Err(DeliveryError::UnknownClient(_)) => session.finish(),
                Err(DeliveryError::Busy) => session.record_ping(elapsed, true),
                Err(_) => session.record_ping(elapsed, false),
            },
            SessionAction::Close(reason) => {
                if let Ok(event) = encode_event(&StreamEvent::Close(reason)) {
                    let _ = registry.send_to(id, &event);
                }
                registry.unregister(id);
                session.finish();
                debug!(client = %id, reason = %reason, "stream closed");
            }
            SessionAction::Done => return,
        }
    }
}
