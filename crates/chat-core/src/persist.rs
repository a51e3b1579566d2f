//! Mirror the message store to durable storage.
//!
//! # Layout
//!
//! ```text
//! msg_count  -> i32, number of entries
//! msg_0      -> oldest message
//! ...
//! msg_<n-1>  -> newest message
//! ```
//!
//! Entries are written as JSON objects. Older firmware wrote a flat
//! `id|name|body|timestamp` string; [`decode_entry`] tries JSON first and
//! falls back to that format so existing flash contents keep loading.

use std::io;
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::model::ChatMessage;
use crate::storage::KvStorage;

/// Storage key holding the number of persisted messages.
pub const COUNT_KEY: &str = "msg_count";

/// Prefix of the per-message keys.
pub const MESSAGE_KEY_PREFIX: &str = "msg_";

/// Default number of unsaved inserts that triggers a batched save.
pub const DEFAULT_BATCH_THRESHOLD: usize = 5;

/// Storage key for the message at logical index `index`.
pub fn message_key(index: usize) -> String {
    format!("{MESSAGE_KEY_PREFIX}{index}")
}

/// When the store writes itself back to durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum PersistPolicy {
    /// Save after every insert (simple, higher flash wear).
    EveryInsert,
    /// Save once `threshold` inserts are pending.
    Batched { threshold: usize },
    /// Save only on [`flush`](crate::store::MessageStore::flush).
    ShutdownOnly,
}

impl Default for PersistPolicy {
    fn default() -> Self {
        PersistPolicy::Batched {
            threshold: DEFAULT_BATCH_THRESHOLD,
        }
    }
}

impl PersistPolicy {
    /// Number of pending inserts that triggers a save, if any.
    pub fn threshold(&self) -> Option<usize> {
        match self {
            PersistPolicy::EveryInsert => Some(1),
            PersistPolicy::Batched { threshold } => Some((*threshold).max(1)),
            PersistPolicy::ShutdownOnly => None,
        }
    }
}

/// Runs a save off the calling thread.
///
/// Returning an error means the task was not started; the caller then saves
/// synchronously.
pub trait SpawnSave: Send + Sync {
    fn spawn(&self, task: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()>;
}

/// Spawns each save on a named OS thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl SpawnSave for ThreadSpawner {
    fn spawn(&self, task: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()> {
        thread::Builder::new()
            .name("chat-save".to_string())
            .spawn(task)
            .map(|_| ())
    }
}

/// Result of [`Persistence::load_all`].
#[derive(Debug, Default)]
pub struct LoadOutcome {
    /// Successfully decoded messages, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Entries that were missing or could not be decoded.
    pub skipped: usize,
}

/// Reads and writes the store's contents through a [`KvStorage`].
#[derive(Clone)]
pub struct Persistence {
    storage: Arc<dyn KvStorage>,
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence").finish_non_exhaustive()
    }
}

impl Persistence {
    pub fn new(storage: Arc<dyn KvStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn KvStorage> {
        &self.storage
    }

    /// Load up to `capacity` messages.
    ///
    /// Individual unreadable entries are logged and skipped. Only a failure to
    /// read the count itself is returned as an error.
    pub fn load_all(&self, capacity: usize) -> Result<LoadOutcome, StorageError> {
        let stored = self.storage.get_i32(COUNT_KEY)?.unwrap_or(0);
        let count = usize::try_from(stored).unwrap_or(0).min(capacity);

        let mut outcome = LoadOutcome::default();
        for index in 0..count {
            let key = message_key(index);
            match self.storage.get_str(&key) {
                Ok(Some(raw)) => match decode_entry(&raw) {
                    Some(message) => outcome.messages.push(message),
                    None => {
                        warn!(key = %key, "skipping undecodable message entry");
                        outcome.skipped += 1;
                    }
                },
                Ok(None) => {
                    warn!(key = %key, "message entry missing");
                    outcome.skipped += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to read message entry");
                    outcome.skipped += 1;
                }
            }
        }

        info!(
            loaded = outcome.messages.len(),
            skipped = outcome.skipped,
            "loaded chat history"
        );
        Ok(outcome)
    }

    /// Write `snapshot` (oldest first) and commit.
    ///
    /// If any write fails the staged transaction is discarded, so the stored
    /// count never refers to entries that were not written.
    pub fn save_all(&self, snapshot: &[ChatMessage]) -> Result<(), StorageError> {
        if let Err(e) = self.stage(snapshot) {
            self.storage.discard();
            return Err(e);
        }
        self.storage.commit()?;
        debug!(count = snapshot.len(), "chat history saved");
        Ok(())
    }

    fn stage(&self, snapshot: &[ChatMessage]) -> Result<(), StorageError> {
        let count = i32::try_from(snapshot.len()).map_err(|_| StorageError::Rejected {
            key: COUNT_KEY.to_string(),
            reason: "message count does not fit in i32".to_string(),
        })?;
        self.storage.set_i32(COUNT_KEY, count)?;
        for (index, message) in snapshot.iter().enumerate() {
            self.storage
                .set_str(&message_key(index), &encode_entry(message)?)?;
        }
        Ok(())
    }
}

/// Encode a message for storage.
pub fn encode_entry(message: &ChatMessage) -> Result<String, StorageError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a stored entry in either the JSON or the legacy delimited format.
///
/// Entries that decode but violate the field limits are rejected too.
pub fn decode_entry(raw: &str) -> Option<ChatMessage> {
    let message = serde_json::from_str::<ChatMessage>(raw)
        .ok()
        .or_else(|| decode_delimited(raw))?;
    message.validate().ok()?;
    Some(message)
}

/// Parse `id|name|body|timestamp`.
///
/// The body is everything between the second separator and the last one,
/// so a `|` inside the text survives.
fn decode_delimited(raw: &str) -> Option<ChatMessage> {
    let (id, rest) = raw.split_once('|')?;
    let (display_name, rest) = rest.split_once('|')?;
    let (body, timestamp) = rest.rsplit_once('|')?;
    let created_at = timestamp.trim().parse().ok()?;
    Some(ChatMessage {
        id: id.to_string(),
        display_name: display_name.to_string(),
        body: body.to_string(),
        created_at,
    })
}
