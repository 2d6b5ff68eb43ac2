//! TTL cache store on top of a key-value storage backend.
//!
//! The store is best-effort: storage failures never reach callers. A broken
//! backend degrades to "always miss", it never breaks a request.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::keys::{CacheKey, Collection, KEY_PREFIX};
use super::storage::KeyValueStore;

/// How long a cached entry is served before it must be refetched.
pub const VALIDITY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Age past which entries are dropped when space is needed.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// Serialized form of a cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry<T> {
  data: T,
  /// Epoch milliseconds at which the entry was stored
  timestamp: i64,
}

/// Diagnostic snapshot of the cache contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub total_count: usize,
  pub valid_count: usize,
  pub expired_count: usize,
  /// Approximate bytes used by cache entries (keys plus values)
  pub total_bytes: usize,
  pub capacity_bytes: Option<usize>,
}

/// TTL cache over a [`KeyValueStore`].
pub struct CacheStore<S: KeyValueStore, C: Clock> {
  storage: S,
  clock: C,
}

impl<S: KeyValueStore, C: Clock> CacheStore<S, C> {
  pub fn new(storage: S, clock: C) -> Self {
    Self { storage, clock }
  }

  /// Direct access to the underlying storage.
  pub fn storage(&self) -> &S {
    &self.storage
  }

  fn age_millis(&self, timestamp: i64) -> i64 {
    self.clock.now_millis() - timestamp
  }

  fn is_expired(&self, timestamp: i64) -> bool {
    self.age_millis(timestamp) > VALIDITY_WINDOW.as_millis() as i64
  }

  /// Cached payload for `key`, if present and still valid.
  ///
  /// Expired and unreadable entries are removed on the way out.
  pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
    let key = key.to_string();

    let raw = match self.storage.get_item(&key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(key = %key, error = %e, "cache read failed");
        return None;
      }
    };

    let entry: StoredEntry<Value> = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key = %key, error = %e, "dropping unreadable cache entry");
        self.remove(&key);
        return None;
      }
    };

    if self.is_expired(entry.timestamp) {
      debug!(key = %key, "cache expired");
      self.remove(&key);
      return None;
    }

    match serde_json::from_value(entry.data) {
      Ok(data) => {
        debug!(
          key = %key,
          age_secs = self.age_millis(entry.timestamp) / 1000,
          "cache hit"
        );
        Some(data)
      }
      Err(e) => {
        warn!(key = %key, error = %e, "dropping cache entry with unexpected shape");
        self.remove(&key);
        None
      }
    }
  }

  /// Store `payload` under `key`.
  ///
  /// When storage is full, stale entries are evicted and the write is retried
  /// once. A write that still fails is dropped.
  pub fn set<T: Serialize>(&self, key: &CacheKey, payload: &T) {
    let key = key.to_string();
    let entry = StoredEntry {
      data: payload,
      timestamp: self.clock.now_millis(),
    };

    let raw = match serde_json::to_string(&entry) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(key = %key, error = %e, "failed to serialize cache entry");
        return;
      }
    };

    match self.storage.set_item(&key, &raw) {
      Ok(()) => debug!(key = %key, "cache stored"),
      Err(e) if e.is_quota_exceeded() => {
        warn!(key = %key, error = %e, "cache full, evicting stale entries");
        self.evict_stale();
        match self.storage.set_item(&key, &raw) {
          Ok(()) => debug!(key = %key, "cache stored after eviction"),
          Err(e) => warn!(key = %key, error = %e, "cache write dropped after retry"),
        }
      }
      Err(e) => warn!(key = %key, error = %e, "cache write dropped"),
    }
  }

  fn remove(&self, key: &str) {
    if let Err(e) = self.storage.remove_item(key) {
      warn!(key = %key, error = %e, "failed to remove cache entry");
    }
  }

  /// Cache-owned keys currently in storage.
  fn cache_keys(&self) -> Vec<String> {
    match self.storage.keys() {
      Ok(keys) => keys
        .into_iter()
        .filter(|k| k.starts_with(KEY_PREFIX))
        .collect(),
      Err(e) => {
        warn!(error = %e, "failed to list cache keys");
        Vec::new()
      }
    }
  }

  /// Remove a single entry.
  pub fn invalidate(&self, key: &CacheKey) {
    let collection = key.owner();
    let key = key.to_string();
    self.remove(&key);
    info!(collection = %collection, key = %key, "cache invalidated");
  }

  /// Remove every entry in a collection's namespace, both the collection
  /// listing and its document entries.
  pub fn invalidate_collection(&self, collection: Collection) {
    let mut removed = 0;
    for key in self.cache_keys() {
      if collection.owns_key(&key) {
        self.remove(&key);
        removed += 1;
      }
    }
    info!(collection = %collection, removed, "cache namespace invalidated");
  }

  /// Remove every cache entry.
  pub fn clear(&self) {
    let keys = self.cache_keys();
    for key in &keys {
      self.remove(key);
    }
    info!(removed = keys.len(), "cache cleared");
  }

  /// Remove entries older than [`STALE_THRESHOLD`] and any entry that can't be
  /// parsed. Returns the number of entries removed.
  pub fn evict_stale(&self) -> usize {
    let threshold = STALE_THRESHOLD.as_millis() as i64;
    let mut removed = 0;

    for key in self.cache_keys() {
      let stale = match self.storage.get_item(&key) {
        Ok(Some(raw)) => match serde_json::from_str::<StoredEntry<Value>>(&raw) {
          Ok(entry) => self.age_millis(entry.timestamp) > threshold,
          Err(_) => true,
        },
        Ok(None) => false,
        Err(_) => true,
      };

      if stale {
        self.remove(&key);
        removed += 1;
      }
    }

    info!(removed, "stale cache entries evicted");
    removed
  }

  /// Counts and sizes of cache entries. Diagnostic only.
  pub fn stats(&self) -> CacheStats {
    let mut stats = CacheStats {
      capacity_bytes: self.storage.capacity_bytes(),
      ..CacheStats::default()
    };

    for key in self.cache_keys() {
      let Ok(Some(raw)) = self.storage.get_item(&key) else {
        continue;
      };
      stats.total_count += 1;
      stats.total_bytes += key.len() + raw.len();

      match serde_json::from_str::<StoredEntry<Value>>(&raw) {
        Ok(entry) if !self.is_expired(entry.timestamp) => stats.valid_count += 1,
        _ => stats.expired_count += 1,
      }
    }

    stats
  }
}
