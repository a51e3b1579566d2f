//! Application context shared by all request handlers.

use std::sync::Arc;

use chat_core::{
    ChatMessage, IdentityGenerator, MessageStore, SinceRendering, StorageError, StoreError,
};
use chat_protocol::{encode_event, CloseReason, StreamEvent};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::DeliveryError;
use crate::registry::{ClientId, ClientRegistry, EventSink};
use crate::session::StreamTimings;

/// The store, the streaming registry and the identity generator, owned
/// together and passed to handlers behind an `Arc`.
///
/// Posting and stream opening are serialized by `publish`, which is always
/// taken before the store or registry lock. Every stream therefore sees the
/// backlog first and then live messages in store insertion order.
#[derive(Debug)]
pub struct ChatHub {
    store: MessageStore,
    registry: ClientRegistry,
    identities: IdentityGenerator,
    timings: StreamTimings,
    publish: Mutex<()>,
}

impl ChatHub {
    pub fn new(
        store: MessageStore,
        registry: ClientRegistry,
        identities: IdentityGenerator,
        timings: StreamTimings,
    ) -> Self {
        Self {
            store,
            registry,
            identities,
            timings,
            publish: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn timings(&self) -> &StreamTimings {
        &self.timings
    }

    /// A fresh anonymous client identifier.
    pub fn issue_identity(&self) -> String {
        let id = self.identities.generate();
        debug!(id = %id, "issued client identity");
        id
    }

    /// Store a message and push it to every open stream.
    pub fn post_message(
        &self,
        id: &str,
        display_name: &str,
        body: &str,
    ) -> Result<ChatMessage, StoreError> {
        let _publishing = self.lock_publish().ok_or(StoreError::Busy)?;
        let message = self.store.append(id, display_name, body)?;
        self.announce(&message);
        Ok(message)
    }

    fn lock_publish(&self) -> Option<MutexGuard<'_, ()>> {
        let guard = self.publish.try_lock_for(self.store.config().lock_timeout);
        if guard.is_none() {
            warn!("publish lock timed out");
        }
        guard
    }

    fn announce(&self, message: &ChatMessage) {
        if self.registry.is_empty() {
            return;
        }
        let event = match encode_event(&StreamEvent::Message(message.clone())) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "failed to encode message event");
                return;
            }
        };
        match self.registry.broadcast(&event) {
            Ok(report) => debug!(
                delivered = report.delivered,
                dropped = report.dropped,
                "message broadcast"
            ),
            Err(e) => warn!(error = %e, "message not broadcast"),
        }
    }

    /// Poll for messages newer than `since`.
    pub fn poll(&self, since: u32) -> Result<SinceRendering, StoreError> {
        self.store.render_since(since)
    }

    /// Register a stream and queue the current history as its first event.
    ///
    /// Holds the publish lock, so no live message can overtake the backlog.
    ///
    /// If the backlog cannot be produced or delivered the client is removed
    /// again before the error is returned.
    pub fn open_stream(&self, sink: Arc<dyn EventSink>) -> Result<ClientId, DeliveryError> {
        let _publishing = self.lock_publish().ok_or(DeliveryError::Busy)?;
        let id = self.registry.register(sink)?;
        if let Err(e) = self.send_backlog(id) {
            self.registry.unregister(id);
            return Err(e);
        }
        info!(client = %id, clients = self.registry.len(), "stream opened");
        Ok(id)
    }

    fn send_backlog(&self, id: ClientId) -> Result<(), DeliveryError> {
        let backlog = self.store.render_all()?;
        let event = encode_event(&StreamEvent::Messages(backlog))?;
        self.registry.send_to(id, &event)
    }

    /// Close every stream and write pending messages to storage.
    ///
    /// Returns the number of messages flushed.
    pub fn shutdown(&self) -> Result<usize, StorageError> {
        match encode_event(&StreamEvent::Close(CloseReason::ServerShutdown)) {
            Ok(event) => {
                let closed = self.registry.close_all(&event);
                info!(closed, "closed open streams");
            }
            Err(e) => error!(error = %e, "failed to encode close event"),
        }
        let flushed = self.store.flush()?;
        info!(flushed, "message store flushed");
        Ok(flushed)
    }
}
