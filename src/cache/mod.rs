//! Local response cache for the remote document store.
//!
//! This module provides:
//! - A persistent key-value storage abstraction (SQLite, memory, no-op)
//! - A TTL cache store with quota-driven stale eviction
//! - Typed collection names and cache key construction
//! - A background sweeper for stale entries

mod clock;
mod keys;
mod storage;
mod store;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use keys::{CacheKey, Collection, KEY_PREFIX};
pub use storage::{
  KeyValueStore, MemoryStorage, NoopStorage, SqliteStorage, StorageError, DEFAULT_CAPACITY_BYTES,
};
pub use store::{CacheStats, CacheStore, STALE_THRESHOLD, VALIDITY_WINDOW};
pub use sweeper::{spawn_sweeper, SweeperHandle, DEFAULT_SWEEP_INTERVAL};
