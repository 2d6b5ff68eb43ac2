//! Background task that periodically evicts stale cache entries.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::clock::Clock;
use super::storage::KeyValueStore;
use super::store::CacheStore;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Handle to a running sweeper. The task stops when the handle is dropped.
pub struct SweeperHandle {
  stop_tx: watch::Sender<bool>,
  task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
  /// Stop the sweeper and wait for it to finish.
  pub async fn shutdown(mut self) {
    let _ = self.stop_tx.send(true);
    if let Some(task) = self.task.take() {
      let _ = task.await;
    }
  }
}

impl Drop for SweeperHandle {
  fn drop(&mut self) {
    let _ = self.stop_tx.send(true);
  }
}

/// Spawn a task that calls [`CacheStore::evict_stale`] every `every`.
///
/// The first sweep happens one full interval after spawning.
pub fn spawn_sweeper<S, C>(store: Arc<CacheStore<S, C>>, every: Duration) -> SweeperHandle
where
  S: KeyValueStore + 'static,
  C: Clock + 'static,
{
  let (stop_tx, mut stop_rx) = watch::channel(false);

  let task = tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    // interval() fires immediately; skip that tick
    ticker.tick().await;

    loop {
      tokio::select! {
        _ = ticker.tick() => {
          let removed = store.evict_stale();
          debug!(removed, "cache sweep finished");
        }
        changed = stop_rx.changed() => {
          if changed.is_err() || *stop_rx.borrow() {
            break;
          }
        }
      }
    }
  });

  SweeperHandle {
    stop_tx,
    task: Some(task),
  }
}
