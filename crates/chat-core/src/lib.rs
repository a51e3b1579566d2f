//! # chat-core
//!
//! Core chat data model, message store and persistence.
//!
//! This crate provides:
//! - Data model types (ChatMessage and its field limits)
//! - A fixed-capacity ring buffer
//! - The mutex-protected message store with JSON rendering
//! - Durable key-value storage backends and the persistence adapter
//! - Client identity generation
//! - Server settings
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! so the same store runs behind tokio on Linux and behind a thread-per-request
//! HTTP server on a microcontroller.

pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod model;
pub mod persist;
pub mod ring;
pub mod storage;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ChatSettings, ConfigError, DeliveryMode, StreamSettings};
pub use error::{StorageError, StoreError};
pub use identity::{IdentityGenerator, OsRandom, RandomSource};
pub use model::*;
pub use persist::{LoadOutcome, PersistPolicy, Persistence, SpawnSave, ThreadSpawner};
pub use ring::RingBuffer;
pub use storage::{JsonFileStorage, KvStorage, MemoryStorage, StoredValue};
pub use store::{MessageStore, SinceRendering, StoreConfig};
