//! Durable key-value storage abstraction.
//!
//! The persistence adapter writes through this trait so the same logic runs
//! against different backends:
//! - Linux: [`JsonFileStorage`] (one JSON file per namespace)
//! - ESP32: the NVS flash partition
//! - Tests: [`MemoryStorage`]
//!
//! Writes are staged and only become visible to a fresh reader on
//! [`commit`](KvStorage::commit). [`discard`](KvStorage::discard) drops
//! everything staged since the last commit, which is how a failed save
//! avoids publishing a count that points at missing entries.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageError;

/// Longest key accepted by the backends (NVS limit).
pub const MAX_KEY_LEN: usize = 15;

/// A value held by the storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Int(i32),
    Str(String),
}

/// Abstract durable key-value namespace.
///
/// All methods are synchronous to support embedded platforms.
pub trait KvStorage: Send + Sync {
    /// Read an integer entry. `Ok(None)` if the key does not exist.
    fn get_i32(&self, key: &str) -> Result<Option<i32>, StorageError>;

    /// Read a string entry. `Ok(None)` if the key does not exist.
    fn get_str(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Stage an integer write.
    fn set_i32(&self, key: &str, value: i32) -> Result<(), StorageError>;

    /// Stage a string write.
    fn set_str(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Atomically publish all staged writes.
    fn commit(&self) -> Result<(), StorageError>;

    /// Drop all staged writes.
    fn discard(&self);
}

/// Committed entries plus the writes staged since the last commit.
#[derive(Debug, Default)]
struct Staged {
    committed: BTreeMap<String, StoredValue>,
    pending: BTreeMap<String, StoredValue>,
}

impl Staged {
    fn get(&self, key: &str) -> Option<&StoredValue> {
        self.pending.get(key).or_else(|| self.committed.get(key))
    }

    fn stage(&mut self, key: &str, value: StoredValue) -> Result<(), StorageError> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(StorageError::Rejected {
                key: key.to_string(),
                reason: format!("key length must be 1..={MAX_KEY_LEN}"),
            });
        }
        self.pending.insert(key.to_string(), value);
        Ok(())
    }

    /// Committed state with the pending writes applied.
    fn merged(&self) -> BTreeMap<String, StoredValue> {
        let mut merged = self.committed.clone();
        merged.extend(self.pending.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

fn int_entry(key: &str, value: Option<&StoredValue>) -> Result<Option<i32>, StorageError> {
    match value {
        None => Ok(None),
        Some(StoredValue::Int(v)) => Ok(Some(*v)),
        Some(StoredValue::Str(_)) => Err(StorageError::Corrupt {
            key: key.to_string(),
            reason: "expected integer, found string".to_string(),
        }),
    }
}

fn str_entry(key: &str, value: Option<&StoredValue>) -> Result<Option<String>, StorageError> {
    match value {
        None => Ok(None),
        Some(StoredValue::Str(v)) => Ok(Some(v.clone())),
        Some(StoredValue::Int(_)) => Err(StorageError::Corrupt {
            key: key.to_string(),
            reason: "expected string, found integer".to_string(),
        }),
    }
}

/// In-memory storage, used by tests and by builds without a data directory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<Staged>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed entry for `key`, ignoring staged writes.
    pub fn committed(&self, key: &str) -> Option<StoredValue> {
        self.data.lock().committed.get(key).cloned()
    }

    /// Number of committed keys.
    pub fn committed_len(&self) -> usize {
        self.data.lock().committed.len()
    }
}

impl KvStorage for MemoryStorage {
    fn get_i32(&self, key: &str) -> Result<Option<i32>, StorageError> {
        int_entry(key, self.data.lock().get(key))
    }

    fn get_str(&self, key: &str) -> Result<Option<String>, StorageError> {
        str_entry(key, self.data.lock().get(key))
    }

    fn set_i32(&self, key: &str, value: i32) -> Result<(), StorageError> {
        self.data.lock().stage(key, StoredValue::Int(value))
    }

    fn set_str(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.data.lock().stage(key, StoredValue::Str(value.to_string()))
    }

    fn commit(&self) -> Result<(), StorageError> {
        let mut data = self.data.lock();
        let pending = std::mem::take(&mut data.pending);
        data.committed.extend(pending);
        Ok(())
    }

    fn discard(&self) {
        self.data.lock().pending.clear();
    }
}

/// File-backed storage: one JSON object per namespace.
///
/// Commits write a temporary file next to the target and rename it into
/// place, so a power cut leaves either the old or the new file.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    data: Mutex<Staged>,
}

impl JsonFileStorage {
    /// Open (or lazily create) the namespace file `<dir>/<namespace>.json`.
    pub fn open(dir: impl AsRef<Path>, namespace: &str) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{namespace}.json"));

        let committed = match fs::read(&path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                    key: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), entries = committed.len(), "opened storage namespace");

        Ok(Self {
            path,
            data: Mutex::new(Staged {
                committed,
                pending: BTreeMap::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KvStorage for JsonFileStorage {
    fn get_i32(&self, key: &str) -> Result<Option<i32>, StorageError> {
        int_entry(key, self.data.lock().get(key))
    }

    fn get_str(&self, key: &str) -> Result<Option<String>, StorageError> {
        str_entry(key, self.data.lock().get(key))
    }

    fn set_i32(&self, key: &str, value: i32) -> Result<(), StorageError> {
        self.data.lock().stage(key, StoredValue::Int(value))
    }

    fn set_str(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.data.lock().stage(key, StoredValue::Str(value.to_string()))
    }

    fn commit(&self) -> Result<(), StorageError> {
        let mut data = self.data.lock();
        if data.pending.is_empty() {
            return Ok(());
        }
        let merged = data.merged();
        let bytes = serde_json::to_vec(&merged)?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        data.committed = merged;
        data.pending.clear();
        Ok(())
    }

    fn discard(&self) {
        self.data.lock().pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_writes_visible_to_same_handle() {
        let storage = MemoryStorage::new();
        storage.set_i32("msg_count", 3).unwrap();
        assert_eq!(storage.get_i32("msg_count").unwrap(), Some(3));
        assert_eq!(storage.committed("msg_count"), None);

        storage.commit().unwrap();
        assert_eq!(storage.committed("msg_count"), Some(StoredValue::Int(3)));
    }

    #[test]
    fn test_discard_drops_pending() {
        let storage = MemoryStorage::new();
        storage.set_str("msg_0", "a").unwrap();
        storage.commit().unwrap();

        storage.set_str("msg_0", "b").unwrap();
        storage.set_str("msg_1", "c").unwrap();
        storage.discard();

        assert_eq!(storage.get_str("msg_0").unwrap().as_deref(), Some("a"));
        assert_eq!(storage.get_str("msg_1").unwrap(), None);
    }

    #[test]
    fn test_type_mismatch_is_corrupt() {
        let storage = MemoryStorage::new();
        storage.set_str("msg_count", "three").unwrap();
        assert!(matches!(
            storage.get_i32("msg_count"),
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_key_length_limit() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.set_i32("a_key_that_is_far_too_long", 1),
            Err(StorageError::Rejected { .. })
        ));
        assert!(storage.set_i32("", 1).is_err());
    }

    #[test]
    fn test_file_storage_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = JsonFileStorage::open(dir.path(), "chat").unwrap();
            storage.set_i32("msg_count", 1).unwrap();
            storage.set_str("msg_0", "hello").unwrap();
            storage.commit().unwrap();
        }

        let storage = JsonFileStorage::open(dir.path(), "chat").unwrap();
        assert_eq!(storage.get_i32("msg_count").unwrap(), Some(1));
        assert_eq!(storage.get_str("msg_0").unwrap().as_deref(), Some("hello"));
        assert!(!storage.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_storage_uncommitted_writes_are_lost() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = JsonFileStorage::open(dir.path(), "chat").unwrap();
            storage.set_i32("msg_count", 9).unwrap();
        }
        let storage = JsonFileStorage::open(dir.path(), "chat").unwrap();
        assert_eq!(storage.get_i32("msg_count").unwrap(), None);
    }

    #[test]
    fn test_file_storage_rejects_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("chat.json"), b"not json").unwrap();
        assert!(matches!(
            JsonFileStorage::open(dir.path(), "chat"),
            Err(StorageError::Corrupt { .. })
        ));
    }
}
