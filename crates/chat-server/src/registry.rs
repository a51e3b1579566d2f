//! Registry of streaming clients.
//!
//! Clients live in a map keyed by [`ClientId`]. Every removal, whether from a
//! failed send, a dead probe, an explicit unregister, a transport disconnect
//! or an idle purge, goes through the same map removal, so there is exactly
//! one place where a client stops existing.
//!
//! Sends happen outside the registry lock: the sinks are copied out, written
//! to, and the outcome is applied under a second short lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_core::{Clock, StreamSettings};
use chat_protocol::EncodedEvent;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{DeliveryError, SinkError};

/// Write side of one client connection.
pub trait EventSink: Send + Sync {
    /// Queue an event for the client without blocking.
    fn send(&self, event: &EncodedEvent) -> Result<(), SinkError>;

    /// Zero-payload liveness check: `false` once the connection is gone.
    fn probe(&self) -> bool;
}

/// Identifier of a registered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Result of probing a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// The probe failed and the client was removed.
    Dead,
    /// The client was already gone.
    Unregistered,
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Clients removed because the send failed.
    pub dropped: usize,
}

/// Registry limits.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub max_clients: usize,
    /// Entries without activity for longer than this are purged on register.
    pub stale_after_secs: u32,
    pub lock_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::from_settings(&StreamSettings::default(), Duration::from_secs(1))
    }
}

impl RegistryConfig {
    pub fn from_settings(settings: &StreamSettings, lock_timeout: Duration) -> Self {
        Self {
            max_clients: settings.max_clients,
            stale_after_secs: u32::try_from(settings.stale_after_secs).unwrap_or(u32::MAX),
            lock_timeout,
        }
    }
}

struct StreamClient {
    sink: Arc<dyn EventSink>,
    last_activity: u32,
}

struct Inner {
    clients: Mutex<HashMap<ClientId, StreamClient>>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
}

/// Shared handle to the set of streaming clients.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<Inner>,
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("config", &self.inner.config)
            .field("clients", &self.len())
            .finish()
    }
}

impl ClientRegistry {
    pub fn new(config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                clients: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                clock,
                config,
            }),
        }
    }

    pub fn max_clients(&self) -> usize {
        self.inner.config.max_clients
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.inner.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.inner.clients.lock().contains_key(&id)
    }

    fn lock_clients(&self) -> Result<MutexGuard<'_, HashMap<ClientId, StreamClient>>, DeliveryError> {
        self.inner
            .clients
            .try_lock_for(self.inner.config.lock_timeout)
            .ok_or_else(|| {
                warn!("client registry lock timed out");
                DeliveryError::Busy
            })
    }

    /// Add a client. Idle entries are purged first; if the registry is still
    /// full the call fails and nothing changes.
    pub fn register(&self, sink: Arc<dyn EventSink>) -> Result<ClientId, DeliveryError> {
        let now = self.inner.clock.now();
        let stale_after = self.inner.config.stale_after_secs;
        let max_clients = self.inner.config.max_clients;

        let mut clients = self.lock_clients()?;
        let before = clients.len();
        clients.retain(|_, c| now.saturating_sub(c.last_activity) <= stale_after);
        let purged = before - clients.len();
        if purged > 0 {
            info!(purged, "purged idle streaming clients");
        }

        if clients.len() >= max_clients {
            warn!(max_clients, "streaming client limit reached");
            return Err(DeliveryError::CapacityExceeded { max_clients });
        }

        let id = ClientId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        clients.insert(
            id,
            StreamClient {
                sink,
                last_activity: now,
            },
        );
        debug!(client = %id, total = clients.len(), "streaming client registered");
        Ok(id)
    }

    /// Remove a client. Returns `false` if it was already gone.
    pub fn unregister(&self, id: ClientId) -> bool {
        let removed = self.inner.clients.lock().remove(&id).is_some();
        if removed {
            debug!(client = %id, "streaming client removed");
        }
        removed
    }

    fn sink_of(&self, id: ClientId) -> Result<Arc<dyn EventSink>, DeliveryError> {
        self.lock_clients()?
            .get(&id)
            .map(|c| Arc::clone(&c.sink))
            .ok_or(DeliveryError::UnknownClient(id))
    }

    fn touch(&self, id: ClientId) {
        let now = self.inner.clock.now();
        if let Some(client) = self.inner.clients.lock().get_mut(&id) {
            client.last_activity = now;
        }
    }

    /// Send `event` to one client. A failed send removes it.
    pub fn send_to(&self, id: ClientId, event: &EncodedEvent) -> Result<(), DeliveryError> {
        let sink = self.sink_of(id)?;
        match sink.send(event) {
            Ok(()) => {
                self.touch(id);
                Ok(())
            }
            Err(e) => {
                debug!(client = %id, error = %e, event = event.name, "send failed");
                self.unregister(id);
                Err(DeliveryError::SendFailed(id))
            }
        }
    }

    /// Send `event` to every client.
    ///
    /// Clients whose send fails are removed; the rest still receive the event.
    pub fn broadcast(&self, event: &EncodedEvent) -> Result<BroadcastReport, DeliveryError> {
        let targets: Vec<(ClientId, Arc<dyn EventSink>)> = self
            .lock_clients()?
            .iter()
            .map(|(id, c)| (*id, Arc::clone(&c.sink)))
            .collect();

        let mut delivered = Vec::with_capacity(targets.len());
        let mut failed = Vec::new();
        for (id, sink) in targets {
            match sink.send(event) {
                Ok(()) => delivered.push(id),
                Err(e) => {
                    debug!(client = %id, error = %e, "broadcast send failed");
                    failed.push(id);
                }
            }
        }

        let now = self.inner.clock.now();
        let mut clients = self.inner.clients.lock();
        for id in &delivered {
            if let Some(client) = clients.get_mut(id) {
                client.last_activity = now;
            }
        }
        for id in &failed {
            clients.remove(id);
        }

        Ok(BroadcastReport {
            delivered: delivered.len(),
            dropped: failed.len(),
        })
    }

    /// Probe one client. A dead client is removed.
    pub fn probe(&self, id: ClientId) -> Result<Liveness, DeliveryError> {
        let sink = match self.sink_of(id) {
            Ok(sink) => sink,
            Err(DeliveryError::UnknownClient(_)) => return Ok(Liveness::Unregistered),
            Err(e) => return Err(e),
        };
        if sink.probe() {
            Ok(Liveness::Alive)
        } else {
            debug!(client = %id, "probe failed");
            self.unregister(id);
            Ok(Liveness::Dead)
        }
    }

    /// Remove every client, sending `event` to each on the way out.
    /// Returns the number of clients removed.
    pub fn close_all(&self, event: &EncodedEvent) -> usize {
        let drained: Vec<(ClientId, StreamClient)> =
            self.inner.clients.lock().drain().collect();
        for (id, client) in &drained {
            if let Err(e) = client.sink.send(event) {
                debug!(client = %id, error = %e, "close notice not delivered");
            }
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::ManualClock;
    use chat_protocol::{encode_event, StreamEvent};
    use std::sync::atomic::AtomicBool;

    /// Records sent events; can be switched to fail.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<EncodedEvent>>,
        broken: AtomicBool,
    }

    impl RecordingSink {
        fn names(&self) -> Vec<&'static str> {
            self.events.lock().iter().map(|e| e.name).collect()
        }

        fn break_connection(&self) {
            self.broken.store(true, Ordering::SeqCst);
        }
    }

    impl EventSink for RecordingSink {
        fn send(&self, event: &EncodedEvent) -> Result<(), SinkError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(SinkError::Closed);
            }
            self.events.lock().push(event.clone());
            Ok(())
        }

        fn probe(&self) -> bool {
            !self.broken.load(Ordering::SeqCst)
        }
    }

    fn registry(max_clients: usize, clock: Arc<ManualClock>) -> ClientRegistry {
        let config = RegistryConfig {
            max_clients,
            stale_after_secs: 300,
            lock_timeout: Duration::from_secs(1),
        };
        ClientRegistry::new(config, clock)
    }

    fn ping() -> EncodedEvent {
        encode_event(&StreamEvent::Ping).unwrap()
    }

    #[test]
    fn test_register_up_to_limit() {
        let registry = registry(3, Arc::new(ManualClock::new(0)));
        let sinks: Vec<Arc<RecordingSink>> = (0..3).map(|_| Arc::default()).collect();
        let ids: Vec<_> = sinks
            .iter()
            .map(|s| registry.register(s.clone()).unwrap())
            .collect();
        assert_eq!(registry.len(), 3);

        let extra = registry.register(Arc::new(RecordingSink::default()));
        assert!(matches!(
            extra,
            Err(DeliveryError::CapacityExceeded { max_clients: 3 })
        ));
        assert_eq!(registry.len(), 3);
        assert!(ids.iter().all(|id| registry.contains(*id)));

        let report = registry.broadcast(&ping()).unwrap();
        assert_eq!(report.delivered, 3);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = registry(2, Arc::new(ManualClock::new(0)));
        let id = registry.register(Arc::new(RecordingSink::default())).unwrap();
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_broadcast_drops_failing_clients_only() {
        let registry = registry(4, Arc::new(ManualClock::new(0)));
        let good = Arc::new(RecordingSink::default());
        let bad = Arc::new(RecordingSink::default());
        let good_id = registry.register(good.clone()).unwrap();
        let bad_id = registry.register(bad.clone()).unwrap();
        bad.break_connection();

        let report = registry.broadcast(&ping()).unwrap();
        assert_eq!(
            report,
            BroadcastReport {
                delivered: 1,
                dropped: 1
            }
        );
        assert!(registry.contains(good_id));
        assert!(!registry.contains(bad_id));
        assert_eq!(good.names(), vec!["ping"]);
    }

    #[test]
    fn test_stale_clients_purged_on_register() {
        let clock = Arc::new(ManualClock::new(1_000));
        let registry = registry(2, clock.clone());
        let idle = registry.register(Arc::new(RecordingSink::default())).unwrap();
        clock.advance(100);
        let busy = registry.register(Arc::new(RecordingSink::default())).unwrap();

        clock.advance(250);
        // idle: 350 s without activity; busy: 250 s
        registry.send_to(busy, &ping()).unwrap();
        let newcomer = registry.register(Arc::new(RecordingSink::default()));

        assert!(newcomer.is_ok());
        assert!(!registry.contains(idle));
        assert!(registry.contains(busy));
    }

    #[test]
    fn test_full_registry_without_stale_entries_rejects() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = registry(1, clock.clone());
        let first = registry.register(Arc::new(RecordingSink::default())).unwrap();
        clock.advance(300);
        assert!(registry.register(Arc::new(RecordingSink::default())).is_err());
        assert!(registry.contains(first));
    }

    #[test]
    fn test_send_to_failure_removes_client() {
        let registry = registry(2, Arc::new(ManualClock::new(0)));
        let sink = Arc::new(RecordingSink::default());
        let id = registry.register(sink.clone()).unwrap();
        sink.break_connection();

        assert!(matches!(
            registry.send_to(id, &ping()),
            Err(DeliveryError::SendFailed(_))
        ));
        assert!(matches!(
            registry.send_to(id, &ping()),
            Err(DeliveryError::UnknownClient(_))
        ));
    }

    #[test]
    fn test_probe_outcomes() {
        let registry = registry(2, Arc::new(ManualClock::new(0)));
        let sink = Arc::new(RecordingSink::default());
        let id = registry.register(sink.clone()).unwrap();

        assert_eq!(registry.probe(id).unwrap(), Liveness::Alive);
        sink.break_connection();
        assert_eq!(registry.probe(id).unwrap(), Liveness::Dead);
        assert_eq!(registry.probe(id).unwrap(), Liveness::Unregistered);
        assert!(sink.names().is_empty());
    }

    #[test]
    fn test_close_all_notifies_and_empties() {
        let registry = registry(3, Arc::new(ManualClock::new(0)));
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();

        let close = encode_event(&StreamEvent::Close(
            chat_protocol::CloseReason::ServerShutdown,
        ))
        .unwrap();
        assert_eq!(registry.close_all(&close), 2);
        assert!(registry.is_empty());
        assert_eq!(a.names(), vec!["close"]);
        assert_eq!(b.names(), vec!["close"]);
    }

    #[test]
    fn test_concurrent_registration_never_exceeds_limit() {
        let registry = registry(10, Arc::new(ManualClock::new(0)));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry
                        .register(Arc::new(RecordingSink::default()))
                        .is_ok()
                })
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(accepted, 10);
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn test_busy_when_registry_lock_held() {
        let config = RegistryConfig {
            max_clients: 2,
            stale_after_secs: 300,
            lock_timeout: Duration::from_millis(20),
        };
        let registry = ClientRegistry::new(config, Arc::new(ManualClock::new(0)));
        let held = registry.inner.clients.lock();

        let other = registry.clone();
        let result =
            std::thread::spawn(move || other.register(Arc::new(RecordingSink::default())))
                .join()
                .unwrap();

        assert!(matches!(result, Err(DeliveryError::Busy)));
        drop(held);
        assert!(registry.register(Arc::new(RecordingSink::default())).is_ok());
    }
}
