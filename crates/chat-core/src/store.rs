//! The message store.
//!
//! A single mutex guards the ring and the rendering cache. Request paths take
//! it with a bounded wait and copy data out before formatting, so the lock is
//! never held across serialization or storage I/O.
//!
//! Timestamps are strictly increasing within a store: an append in the same
//! second as the newest message gets `newest + 1`. A poll that passes back the
//! previous `server_time` therefore never misses or repeats a message.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::error::{StorageError, StoreError};
use crate::model::{ChatMessage, DEFAULT_CAPACITY};
use crate::persist::{PersistPolicy, Persistence, SpawnSave};
use crate::ring::RingBuffer;

/// Store tuning knobs.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub capacity: usize,
    /// How long a full rendering stays valid without an insert.
    pub cache_ttl_secs: u32,
    /// Longest wait for the store lock on request paths.
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            cache_ttl_secs: 30,
            lock_timeout: Duration::from_secs(1),
        }
    }
}

/// Output of [`MessageStore::render_since`].
#[derive(Debug, Clone)]
pub struct SinceRendering {
    /// `{"messages":[...],"server_time":..,"has_new_messages":..}`
    pub json: String,
    /// Cursor for the client's next poll.
    pub server_time: u32,
    pub has_new: bool,
    /// Number of messages in the rendering.
    pub count: usize,
}

#[derive(Serialize)]
struct SinceBody<'a> {
    messages: &'a [ChatMessage],
    server_time: u32,
    has_new_messages: bool,
}

#[derive(Debug)]
struct RenderCache {
    json: Arc<str>,
    rendered_at: u32,
}

#[derive(Debug)]
struct StoreState {
    ring: RingBuffer<ChatMessage>,
    cache: Option<RenderCache>,
    /// Bumped on every mutation so a stale rendering is never cached.
    generation: u64,
}

struct Persister {
    persistence: Persistence,
    policy: PersistPolicy,
    spawner: Arc<dyn SpawnSave>,
    /// Inserts not yet written to storage.
    unsaved: AtomicUsize,
    /// Serializes saves so an older snapshot never overwrites a newer one.
    save_lock: Mutex<()>,
}

struct Shared {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    persister: Option<Persister>,
}

/// Shared handle to the process-wide message store.
#[derive(Clone)]
pub struct MessageStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("config", &self.shared.config)
            .field("persistent", &self.shared.persister.is_some())
            .finish()
    }
}

impl MessageStore {
    /// Create an in-memory store.
    ///
    /// # Panics
    ///
    /// Panics if `config.capacity` is zero.
    pub fn new(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self::build(config, clock, None)
    }

    /// Create a store that mirrors itself to `persistence` according to `policy`.
    pub fn with_persistence(
        config: StoreConfig,
        clock: Arc<dyn Clock>,
        persistence: Persistence,
        policy: PersistPolicy,
        spawner: Arc<dyn SpawnSave>,
    ) -> Self {
        let persister = Persister {
            persistence,
            policy,
            spawner,
            unsaved: AtomicUsize::new(0),
            save_lock: Mutex::new(()),
        };
        Self::build(config, clock, Some(persister))
    }

    fn build(config: StoreConfig, clock: Arc<dyn Clock>, persister: Option<Persister>) -> Self {
        let state = StoreState {
            ring: RingBuffer::new(config.capacity),
            cache: None,
            generation: 0,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                clock,
                config,
                persister,
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    pub fn capacity(&self) -> usize {
        self.shared.config.capacity
    }

    /// Number of messages currently held.
    pub fn len(&self) -> usize {
        self.shared.state.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ring slot the next append writes to.
    pub fn next_write_index(&self) -> usize {
        self.shared.state.lock().ring.next_write_index()
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.shared
            .state
            .try_lock_for(self.shared.config.lock_timeout)
            .ok_or_else(|| {
                warn!("message store lock timed out");
                StoreError::Busy
            })
    }

    /// Validate and insert a message, evicting the oldest one when full.
    ///
    /// The timestamp is assigned here. A failed background save is logged and
    /// never undoes the insert.
    pub fn append(
        &self,
        id: &str,
        display_name: &str,
        body: &str,
    ) -> Result<ChatMessage, StoreError> {
        ChatMessage::validate_fields(id, display_name, body)?;

        let message = {
            let mut state = self.lock_state()?;
            let now = self.shared.clock.now();
            let created_at = match state.ring.newest() {
                Some(newest) => now.max(newest.created_at.saturating_add(1)),
                None => now,
            };
            let message = ChatMessage {
                id: id.to_string(),
                display_name: display_name.to_string(),
                body: body.to_string(),
                created_at,
            };
            state.ring.push(message.clone());
            state.cache = None;
            state.generation += 1;
            message
        };
        debug!(created_at = message.created_at, "message appended");

        self.after_insert();
        Ok(message)
    }

    /// Copy of every held message, oldest first.
    pub fn snapshot(&self) -> Result<Vec<ChatMessage>, StoreError> {
        let state = self.lock_state()?;
        copy_out(state.ring.iter(), state.ring.len())
    }

    /// Held messages with `created_at > since`, oldest first.
    pub fn messages_since(&self, since: u32) -> Result<Vec<ChatMessage>, StoreError> {
        let state = self.lock_state()?;
        collect_since(&state.ring, since)
    }

    /// Current cursor value: the clock, or the newest timestamp if that is ahead.
    pub fn server_time(&self) -> Result<u32, StoreError> {
        let state = self.lock_state()?;
        Ok(self.server_time_locked(&state))
    }

    fn server_time_locked(&self, state: &StoreState) -> u32 {
        let now = self.shared.clock.now();
        state
            .ring
            .newest()
            .map_or(now, |newest| now.max(newest.created_at))
    }

    /// All held messages as a JSON array, oldest first.
    ///
    /// Served from the cache while it is younger than the TTL.
    pub fn render_all(&self) -> Result<Arc<str>, StoreError> {
        let (snapshot, generation) = {
            let state = self.lock_state()?;
            if let Some(cache) = &state.cache {
                let age = self.shared.clock.now().saturating_sub(cache.rendered_at);
                if age < self.shared.config.cache_ttl_secs {
                    return Ok(Arc::clone(&cache.json));
                }
            }
            (copy_out(state.ring.iter(), state.ring.len())?, state.generation)
        };

        let json: Arc<str> = serde_json::to_string(&snapshot)?.into();

        if let Some(mut state) = self.shared.state.try_lock_for(self.shared.config.lock_timeout) {
            if state.generation == generation {
                state.cache = Some(RenderCache {
                    json: Arc::clone(&json),
                    rendered_at: self.shared.clock.now(),
                });
            }
        }
        Ok(json)
    }

    /// Poll response for a client whose cursor is `since`.
    pub fn render_since(&self, since: u32) -> Result<SinceRendering, StoreError> {
        let (messages, server_time) = {
            let state = self.lock_state()?;
            (collect_since(&state.ring, since)?, self.server_time_locked(&state))
        };

        let has_new = !messages.is_empty();
        let json = serde_json::to_string(&SinceBody {
            messages: &messages,
            server_time,
            has_new_messages: has_new,
        })?;
        Ok(SinceRendering {
            json,
            server_time,
            has_new,
            count: messages.len(),
        })
    }

    /// Replace the contents with `messages` (oldest first), keeping at most
    /// `capacity` of them. Returns the number held afterwards.
    pub fn restore(&self, messages: Vec<ChatMessage>) -> usize {
        let mut state = self.shared.state.lock();
        state.ring.clear();
        for message in messages.into_iter().take(self.shared.config.capacity) {
            state.ring.push(message);
        }
        state.cache = None;
        state.generation += 1;
        state.ring.len()
    }

    /// Reload the contents from durable storage. A store without persistence
    /// keeps its contents and reports zero.
    pub fn restore_from_storage(&self) -> Result<usize, StorageError> {
        let Some(persister) = &self.shared.persister else {
            return Ok(0);
        };
        let outcome = persister.persistence.load_all(self.shared.config.capacity)?;
        Ok(self.restore(outcome.messages))
    }

    /// Write pending inserts now, regardless of policy.
    ///
    /// Returns the number of messages written (zero when nothing was pending).
    pub fn flush(&self) -> Result<usize, StorageError> {
        self.save_pending()
    }

    /// Inserts not yet persisted.
    pub fn unsaved(&self) -> usize {
        self.shared
            .persister
            .as_ref()
            .map_or(0, |p| p.unsaved.load(Ordering::SeqCst))
    }

    fn after_insert(&self) {
        let Some(persister) = &self.shared.persister else {
            return;
        };
        let pending = persister.unsaved.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(threshold) = persister.policy.threshold() else {
            return;
        };
        if pending < threshold {
            return;
        }

        let store = self.clone();
        let task = Box::new(move || store.save_logged());
        if let Err(e) = persister.spawner.spawn(task) {
            warn!(error = %e, "could not spawn save worker, saving inline");
            self.save_logged();
        }
    }

    fn save_logged(&self) {
        match self.save_pending() {
            Ok(0) => {}
            Ok(count) => debug!(count, "persisted message store"),
            Err(e) => error!(error = %e, "failed to persist message store"),
        }
    }

    fn save_pending(&self) -> Result<usize, StorageError> {
        let Some(persister) = &self.shared.persister else {
            return Ok(0);
        };
        let _saving = persister.save_lock.lock();
        let taken = persister.unsaved.swap(0, Ordering::SeqCst);
        if taken == 0 {
            return Ok(0);
        }

        let snapshot: Vec<ChatMessage> = {
            let state = self.shared.state.lock();
            state.ring.iter().cloned().collect()
        };
        match persister.persistence.save_all(&snapshot) {
            Ok(()) => Ok(snapshot.len()),
            Err(e) => {
                persister.unsaved.fetch_add(taken, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

fn copy_out<'a>(
    messages: impl Iterator<Item = &'a ChatMessage>,
    len: usize,
) -> Result<Vec<ChatMessage>, StoreError> {
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| StoreError::OutOfMemory)?;
    out.extend(messages.cloned());
    Ok(out)
}

fn collect_since(
    ring: &RingBuffer<ChatMessage>,
    since: u32,
) -> Result<Vec<ChatMessage>, StoreError> {
    // Restored history may be out of order, so scan every slot.
    let newer = ring.iter().filter(|m| m.created_at > since).count();
    copy_out(ring.iter().filter(|m| m.created_at > since), newer)
}
