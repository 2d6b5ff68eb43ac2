//! Key-value storage trait and its SQLite, in-memory and no-op implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Default storage capacity, matching the usual browser local-storage limit.
pub const DEFAULT_CAPACITY_BYTES: usize = 5 * 1024 * 1024;

/// Errors raised by a key-value storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("storage quota exceeded: {needed} bytes needed, capacity is {capacity} bytes")]
  QuotaExceeded { needed: usize, capacity: usize },

  #[error("storage backend error: {0}")]
  Backend(String),
}

impl StorageError {
  pub fn is_quota_exceeded(&self) -> bool {
    matches!(self, StorageError::QuotaExceeded { .. })
  }
}

/// Synchronous string key-value storage.
///
/// Writes may fail with [`StorageError::QuotaExceeded`] when the backend is full.
pub trait KeyValueStore: Send + Sync {
  /// Read a value, `None` if the key is absent.
  fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

  /// Write a value, replacing any previous one.
  fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

  /// Remove a value. Removing an absent key is not an error.
  fn remove_item(&self, key: &str) -> Result<(), StorageError>;

  /// All keys currently stored.
  fn keys(&self) -> Result<Vec<String>, StorageError>;

  /// Maximum number of bytes the backend accepts, if bounded.
  fn capacity_bytes(&self) -> Option<usize> {
    None
  }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
  fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
    (**self).get_item(key)
  }

  fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
    (**self).set_item(key, value)
  }

  fn remove_item(&self, key: &str) -> Result<(), StorageError> {
    (**self).remove_item(key)
  }

  fn keys(&self) -> Result<Vec<String>, StorageError> {
    (**self).keys()
  }

  fn capacity_bytes(&self) -> Option<usize> {
    (**self).capacity_bytes()
  }
}

/// Storage implementation that doesn't keep anything.
/// Used when caching is disabled - every read misses.
pub struct NoopStorage;

impl KeyValueStore for NoopStorage {
  fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
    Ok(None) // Always miss
  }

  fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
    Ok(()) // Discard
  }

  fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StorageError> {
    Ok(Vec::new())
  }
}

/// Bytes an entry occupies, counted the way local storage counts them.
fn entry_size(key: &str, value: &str) -> usize {
  key.len() + value.len()
}

/// In-process storage, optionally bounded.
#[derive(Default)]
pub struct MemoryStorage {
  items: Mutex<BTreeMap<String, String>>,
  capacity: Option<usize>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      items: Mutex::new(BTreeMap::new()),
      capacity: Some(capacity),
    }
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, StorageError> {
    self
      .items
      .lock()
      .map_err(|e| StorageError::Backend(format!("Lock poisoned: {}", e)))
  }
}

impl KeyValueStore for MemoryStorage {
  fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
    Ok(self.lock()?.get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let mut items = self.lock()?;

    if let Some(capacity) = self.capacity {
      let others: usize = items
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| entry_size(k, v))
        .sum();
      let needed = others + entry_size(key, value);
      if needed > capacity {
        return Err(StorageError::QuotaExceeded { needed, capacity });
      }
    }

    items.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<(), StorageError> {
    self.lock()?.remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StorageError> {
    Ok(self.lock()?.keys().cloned().collect())
  }

  fn capacity_bytes(&self) -> Option<usize> {
    self.capacity
  }
}

/// SQLite-based persistent storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  capacity: usize,
}

/// Schema for the key-value table.
const STORAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStorage {
  /// Open (or create) the storage database.
  ///
  /// Without an explicit path the database lives under the user data
  /// directory, one file per Firestore project.
  pub fn open(path: Option<&Path>, project_id: &str, capacity: usize) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path(project_id)?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn, capacity)
  }

  /// Storage backed by a private in-memory database.
  pub fn open_in_memory(capacity: usize) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn, capacity)
  }

  fn from_connection(conn: Connection, capacity: usize) -> Result<Self> {
    conn
      .execute_batch(STORAGE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
      capacity,
    })
  }

  /// Default database path for a project.
  pub fn default_path(project_id: &str) -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("fmcache").join(format!("{}.db", project_digest(project_id))))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
    self
      .conn
      .lock()
      .map_err(|e| StorageError::Backend(format!("Lock poisoned: {}", e)))
  }
}

/// Short stable file name for a project id.
fn project_digest(project_id: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(project_id.as_bytes());
  let digest = hex::encode(hasher.finalize());
  digest[..16].to_string()
}

fn backend(context: &str, e: rusqlite::Error) -> StorageError {
  StorageError::Backend(format!("{}: {}", context, e))
}

impl KeyValueStore for SqliteStorage {
  fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
    let conn = self.lock()?;
    conn
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| backend("Failed to read cache entry", e))
  }

  fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let conn = self.lock()?;

    let others: i64 = conn
      .query_row(
        "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
         FROM kv WHERE key != ?",
        params![key],
        |row| row.get(0),
      )
      .map_err(|e| backend("Failed to measure cache size", e))?;

    let needed = others as usize + entry_size(key, value);
    if needed > self.capacity {
      return Err(StorageError::QuotaExceeded {
        needed,
        capacity: self.capacity,
      });
    }

    conn
      .execute(
        "INSERT OR REPLACE INTO kv (key, value, stored_at) VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| backend("Failed to store cache entry", e))?;

    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<(), StorageError> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM kv WHERE key = ?", params![key])
      .map_err(|e| backend("Failed to remove cache entry", e))?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StorageError> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT key FROM kv ORDER BY key")
      .map_err(|e| backend("Failed to prepare key listing", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| backend("Failed to list keys", e))?
      .collect::<Result<Vec<String>, _>>()
      .map_err(|e| backend("Failed to read key", e))?;

    Ok(keys)
  }

  fn capacity_bytes(&self) -> Option<usize> {
    Some(self.capacity)
  }
}
