//! Per-run session that owns the cache, the Firestore client and the sweeper.

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::cache::{
  spawn_sweeper, CacheStore, KeyValueStore, MemoryStorage, NoopStorage, SqliteStorage,
  SweeperHandle, SystemClock,
};
use crate::config::{CacheConfig, Config};
use crate::firestore::FirestoreClient;
use crate::remote::CachedDocumentStore;

/// Cached store type used by the application.
pub type SessionStore = CachedDocumentStore<FirestoreClient, Box<dyn KeyValueStore>, SystemClock>;

/// How a session should set itself up.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
  /// Keep the cache in memory only
  pub ephemeral: bool,
  /// Run the background stale-entry sweeper
  pub sweep: bool,
}

/// Everything one run needs, created once and dropped at the end.
pub struct Session {
  store: SessionStore,
  sweeper: Option<SweeperHandle>,
}

impl Session {
  /// Open storage and the Firestore client.
  ///
  /// Callers await this once; there is nothing to poll for afterwards.
  pub async fn open(config: &Config, options: SessionOptions) -> Result<Self> {
    let remote = FirestoreClient::new(&config.firestore)?;

    let cache_config = config.cache.clone();
    let project_id = config.firestore.project_id.clone();
    let storage = tokio::task::spawn_blocking(move || {
      open_storage(&cache_config, &project_id, options.ephemeral)
    })
    .await
    .map_err(|e| eyre!("Cache storage initialization panicked: {}", e))??;

    let store = CachedDocumentStore::new(remote, CacheStore::new(storage, SystemClock));

    let sweeper = (options.sweep && config.cache.enabled).then(|| {
      spawn_sweeper(
        std::sync::Arc::clone(store.cache()),
        config.cache.sweep_interval(),
      )
    });

    info!(
      project = %config.firestore.project_id,
      cache_enabled = config.cache.enabled,
      ephemeral = options.ephemeral,
      "session opened"
    );

    Ok(Self { store, sweeper })
  }

  pub fn store(&self) -> &SessionStore {
    &self.store
  }

  /// Stop background work.
  pub async fn close(mut self) {
    if let Some(sweeper) = self.sweeper.take() {
      sweeper.shutdown().await;
    }
  }
}

/// Pick the storage backend for the cache configuration.
fn open_storage(
  config: &CacheConfig,
  project_id: &str,
  ephemeral: bool,
) -> Result<Box<dyn KeyValueStore>> {
  if !config.enabled {
    return Ok(Box::new(NoopStorage));
  }
  if ephemeral {
    return Ok(Box::new(MemoryStorage::with_capacity(config.capacity_bytes)));
  }

  let storage = SqliteStorage::open(config.path.as_deref(), project_id, config.capacity_bytes)?;
  Ok(Box::new(storage))
}
