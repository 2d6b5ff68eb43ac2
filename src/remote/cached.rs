//! Cached document store that wraps a remote store with transparent caching.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Condition, Document, DocumentStore, Fields, Response};
use crate::cache::{CacheKey, CacheStore, Clock, Collection, KeyValueStore};

/// Document store with read-through caching and write invalidation.
///
/// Reads are served from the cache while valid. Successful writes drop every
/// cached entry in the written collection's namespace, so a listing never
/// outlives a change to one of its documents.
pub struct CachedDocumentStore<R, S, C>
where
  R: DocumentStore,
  S: KeyValueStore,
  C: Clock,
{
  remote: Arc<R>,
  cache: Arc<CacheStore<S, C>>,
}

impl<R, S, C> CachedDocumentStore<R, S, C>
where
  R: DocumentStore,
  S: KeyValueStore,
  C: Clock,
{
  pub fn new(remote: R, cache: CacheStore<S, C>) -> Self {
    Self {
      remote: Arc::new(remote),
      cache: Arc::new(cache),
    }
  }

  /// The cache store, shared with anything that needs to inspect or sweep it.
  pub fn cache(&self) -> &Arc<CacheStore<S, C>> {
    &self.cache
  }

  /// The uncached remote store.
  pub fn remote(&self) -> &R {
    &self.remote
  }

  /// All documents in a collection, from cache when valid.
  pub async fn get_all_documents(
    &self,
    collection: Collection,
    force_refresh: bool,
  ) -> Response<Vec<Document>> {
    let key = CacheKey::collection(collection);

    if !force_refresh {
      if let Some(cached) = self.cache.get::<Response<Vec<Document>>>(&key) {
        return cached;
      }
    }

    debug!(collection = %collection, "fetching collection from remote");
    let result = self.remote.fetch_all(collection).await;

    if result.is_success() && result.data.is_some() {
      self.cache.set(&key, &result);
    }

    result
  }

  /// One document, from cache when valid.
  pub async fn get_document(
    &self,
    collection: Collection,
    id: &str,
    force_refresh: bool,
  ) -> Response<Document> {
    let key = CacheKey::document(collection, id);

    if !force_refresh {
      if let Some(cached) = self.cache.get::<Response<Document>>(&key) {
        return cached;
      }
    }

    debug!(collection = %collection, id, "fetching document from remote");
    let result = self.remote.fetch_one(collection, id).await;

    if result.is_success() && result.data.is_some() {
      self.cache.set(&key, &result);
    }

    result
  }

  /// Create a document (not cached - write operation).
  pub async fn add_document(&self, collection: Collection, data: Fields) -> Response<String> {
    let result = self.remote.create(collection, data).await;

    if result.is_success() {
      self.cache.invalidate_collection(collection);
    }

    result
  }

  /// Merge fields into a document (not cached - write operation).
  pub async fn update_document(
    &self,
    collection: Collection,
    id: &str,
    data: Fields,
  ) -> Response<()> {
    let result = self.remote.upsert(collection, id, data).await;

    if result.is_success() {
      self.cache.invalidate(&CacheKey::document(collection, id));
      self.cache.invalidate_collection(collection);
    }

    result
  }

  /// Delete a document (not cached - write operation).
  pub async fn delete_document(&self, collection: Collection, id: &str) -> Response<()> {
    let result = self.remote.delete(collection, id).await;

    if result.is_success() {
      self.cache.invalidate(&CacheKey::document(collection, id));
      self.cache.invalidate_collection(collection);
    }

    result
  }

  /// Conditional lookup (never cached - results depend on the predicates).
  pub async fn query_documents(
    &self,
    collection: Collection,
    conditions: &[Condition],
  ) -> Response<Vec<Document>> {
    debug!(collection = %collection, conditions = conditions.len(), "querying remote");
    self.remote.query(collection, conditions).await
  }

  /// Delete every document in a collection.
  ///
  /// The listing is read fresh from the remote store. Deletion stops at the
  /// first failure; the answer carries how many documents were removed.
  pub async fn purge_collection(&self, collection: Collection) -> Response<usize> {
    let listing = self.remote.fetch_all(collection).await;
    let docs = match listing {
      Response {
        success: true,
        data: Some(docs),
        ..
      } => docs,
      Response { error, .. } => {
        return Response::failed(error.unwrap_or_else(|| "listing failed".to_string()));
      }
    };

    let total = docs.len();
    let mut deleted = 0;
    let mut failure = None;

    for doc in &docs {
      let result = self.remote.delete(collection, &doc.id).await;
      if !result.is_success() {
        failure = Some(result.error.unwrap_or_default());
        break;
      }
      deleted += 1;
    }

    if deleted > 0 {
      self.cache.invalidate_collection(collection);
    }
    info!(collection = %collection, deleted, total, "collection purged");

    match failure {
      None => Response::ok(deleted),
      Some(error) => Response {
        success: false,
        data: Some(deleted),
        error: Some(format!("deleted {} of {} documents: {}", deleted, total, error)),
      },
    }
  }

  /// Document counts per collection, through the cache.
  pub async fn counts(&self, collections: &[Collection]) -> Vec<(Collection, Response<usize>)> {
    let lookups = collections.iter().map(|&collection| async move {
      let count = self
        .get_all_documents(collection, false)
        .await
        .map(|docs| docs.len());
      (collection, count)
    });

    join_all(lookups).await
  }
}

impl<R, S, C> Clone for CachedDocumentStore<R, S, C>
where
  R: DocumentStore,
  S: KeyValueStore,
  C: Clock,
{
  fn clone(&self) -> Self {
    Self {
      remote: Arc::clone(&self.remote),
      cache: Arc::clone(&self.cache),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ManualClock, MemoryStorage, VALIDITY_WINDOW};
  use crate::remote::fake::FakeStore;
  use crate::remote::Operator;
  use serde_json::{json, Value};
  use std::time::Duration;

  type Store = CachedDocumentStore<FakeStore, MemoryStorage, ManualClock>;

  fn setup() -> (Store, ManualClock) {
    let clock = ManualClock::new(1_700_000_000_000);
    let remote = FakeStore::new();
    remote.insert(Collection::Equipment, "EQ0001", json!({"model": "A", "floor": 1}));
    remote.insert(Collection::Equipment, "EQ0002", json!({"model": "B", "floor": 3}));
    remote.insert(Collection::Sites, "SITE001", json!({"name": "HQ"}));

    let cache = CacheStore::new(MemoryStorage::new(), clock.clone());
    (CachedDocumentStore::new(remote, cache), clock)
  }

  fn fields(value: Value) -> Fields {
    match value {
      Value::Object(map) => map,
      _ => Fields::new(),
    }
  }

  fn storage_keys(store: &Store) -> Vec<String> {
    store.cache().storage().keys().unwrap()
  }

  /// Warm the equipment listing and both equipment documents.
  async fn warm_equipment(store: &Store) {
    assert!(store.get_all_documents(Collection::Equipment, false).await.success);
    assert!(store.get_document(Collection::Equipment, "EQ0001", false).await.success);
    assert!(store.get_document(Collection::Equipment, "EQ0002", false).await.success);
    assert!(store.get_all_documents(Collection::Sites, false).await.success);
  }

  #[tokio::test]
  async fn test_get_all_is_read_through() {
    let (store, _clock) = setup();

    let first = store.get_all_documents(Collection::Equipment, false).await;
    assert_eq!(first.data.as_ref().map(Vec::len), Some(2));
    assert_eq!(store.remote().calls("fetch_all"), 1);
    assert_eq!(storage_keys(&store), vec!["cache_equipment".to_string()]);

    let second = store.get_all_documents(Collection::Equipment, false).await;
    assert_eq!(second, first);
    assert_eq!(store.remote().calls("fetch_all"), 1);
  }

  #[tokio::test]
  async fn test_refetch_after_window() {
    let (store, clock) = setup();

    store.get_all_documents(Collection::Equipment, false).await;
    clock.advance(VALIDITY_WINDOW + Duration::from_secs(1));
    store.get_all_documents(Collection::Equipment, false).await;

    assert_eq!(store.remote().calls("fetch_all"), 2);
  }

  #[tokio::test]
  async fn test_force_refresh_bypasses_cache() {
    let (store, _clock) = setup();

    store.get_all_documents(Collection::Equipment, false).await;
    store
      .remote()
      .insert(Collection::Equipment, "EQ0003", json!({"model": "C"}));

    let refreshed = store.get_all_documents(Collection::Equipment, true).await;
    assert_eq!(refreshed.data.map(|d| d.len()), Some(3));
    assert_eq!(store.remote().calls("fetch_all"), 2);

    // The refreshed result replaced the cached one
    let cached = store.get_all_documents(Collection::Equipment, false).await;
    assert_eq!(cached.data.map(|d| d.len()), Some(3));
    assert_eq!(store.remote().calls("fetch_all"), 2);
  }

  #[tokio::test]
  async fn test_get_document_cached_per_id() {
    let (store, _clock) = setup();

    let doc = store.get_document(Collection::Equipment, "EQ0001", false).await;
    assert_eq!(doc.data.as_ref().map(|d| d.id.as_str()), Some("EQ0001"));
    store.get_document(Collection::Equipment, "EQ0001", false).await;
    store.get_document(Collection::Equipment, "EQ0002", false).await;

    assert_eq!(store.remote().calls("fetch_one"), 2);
    assert_eq!(
      storage_keys(&store),
      vec![
        "cache_equipment_EQ0001".to_string(),
        "cache_equipment_EQ0002".to_string(),
      ]
    );
  }

  #[tokio::test]
  async fn test_body_id_field_survives_cache_hit() {
    let (store, _clock) = setup();
    store.remote().insert(
      Collection::Sites,
      "SITE002",
      json!({"id": "SITE002-LEGACY", "name": "Annex"}),
    );

    let fresh = store.get_document(Collection::Sites, "SITE002", false).await;
    let cached = store.get_document(Collection::Sites, "SITE002", false).await;
    assert_eq!(store.remote().calls("fetch_one"), 1);
    assert_eq!(cached, fresh);

    let doc = cached.data.unwrap();
    assert_eq!(doc.id, "SITE002");
    assert_eq!(doc.fields.get("id"), Some(&json!("SITE002-LEGACY")));

    let fresh_list = store.get_all_documents(Collection::Sites, false).await;
    let cached_list = store.get_all_documents(Collection::Sites, false).await;
    assert_eq!(store.remote().calls("fetch_all"), 1);
    assert_eq!(cached_list, fresh_list);
  }

  #[tokio::test]
  async fn test_failed_reads_are_not_cached() {
    let (store, _clock) = setup();

    let missing = store.get_document(Collection::Equipment, "NOPE", false).await;
    assert!(!missing.success);
    assert_eq!(missing.error.as_deref(), Some("Document not found"));

    store.remote().set_failing(true);
    let failed = store.get_all_documents(Collection::Sites, false).await;
    assert_eq!(failed, Response::failed("unavailable"));

    assert!(storage_keys(&store).is_empty());
  }

  #[tokio::test]
  async fn test_update_invalidates_document_and_collection() {
    let (store, _clock) = setup();
    warm_equipment(&store).await;

    let result = store
      .update_document(Collection::Equipment, "EQ0001", fields(json!({"model": "X"})))
      .await;
    assert!(result.success);

    let cache = store.cache();
    assert_eq!(cache.get::<Value>(&CacheKey::document(Collection::Equipment, "EQ0001")), None);
    assert_eq!(cache.get::<Value>(&CacheKey::collection(Collection::Equipment)), None);
    assert_eq!(storage_keys(&store), vec!["cache_sites".to_string()]);

    let doc = store.get_document(Collection::Equipment, "EQ0001", false).await;
    let doc = doc.data.unwrap();
    assert_eq!(doc.fields.get("model"), Some(&json!("X")));
    assert_eq!(doc.fields.get("floor"), Some(&json!(1)));
  }

  #[tokio::test]
  async fn test_add_invalidates_whole_namespace() {
    let (store, _clock) = setup();
    warm_equipment(&store).await;

    let result = store
      .add_document(Collection::Equipment, fields(json!({"model": "N"})))
      .await;
    assert_eq!(result, Response::ok("DOC0001".to_string()));
    assert_eq!(storage_keys(&store), vec!["cache_sites".to_string()]);

    let listing = store.get_all_documents(Collection::Equipment, false).await;
    assert_eq!(listing.data.map(|d| d.len()), Some(3));
  }

  #[tokio::test]
  async fn test_delete_invalidates_namespace() {
    let (store, _clock) = setup();
    warm_equipment(&store).await;

    assert!(store.delete_document(Collection::Equipment, "EQ0002").await.success);
    assert_eq!(storage_keys(&store), vec!["cache_sites".to_string()]);

    let gone = store.get_document(Collection::Equipment, "EQ0002", false).await;
    assert!(!gone.success);
  }

  #[tokio::test]
  async fn test_failed_writes_keep_cache() {
    let (store, _clock) = setup();
    warm_equipment(&store).await;
    let before = storage_keys(&store);

    store.remote().set_failing(true);
    let update = store
      .update_document(Collection::Equipment, "EQ0001", fields(json!({"model": "X"})))
      .await;
    assert_eq!(update.error.as_deref(), Some("unavailable"));
    assert!(!store.add_document(Collection::Equipment, Fields::new()).await.success);
    assert!(!store.delete_document(Collection::Equipment, "EQ0001").await.success);

    assert_eq!(storage_keys(&store), before);
  }

  #[tokio::test]
  async fn test_query_bypasses_cache() {
    let (store, _clock) = setup();
    warm_equipment(&store).await;
    let before: Vec<_> = storage_keys(&store)
      .into_iter()
      .map(|k| store.cache().storage().get_item(&k).unwrap())
      .collect();

    let conditions = [Condition::new("floor", Operator::GreaterThan, 2)];
    let first = store.query_documents(Collection::Equipment, &conditions).await;
    let second = store.query_documents(Collection::Equipment, &conditions).await;

    assert_eq!(first.data.as_ref().map(|d| d[0].id.as_str()), Some("EQ0002"));
    assert_eq!(first, second);
    assert_eq!(store.remote().calls("query"), 2);

    let after: Vec<_> = storage_keys(&store)
      .into_iter()
      .map(|k| store.cache().storage().get_item(&k).unwrap())
      .collect();
    assert_eq!(before, after);
  }

  #[tokio::test]
  async fn test_purge_collection() {
    let (store, _clock) = setup();
    warm_equipment(&store).await;

    let purged = store.purge_collection(Collection::Equipment).await;
    assert_eq!(purged, Response::ok(2));
    assert_eq!(store.remote().calls("delete"), 2);
    assert_eq!(storage_keys(&store), vec!["cache_sites".to_string()]);

    let listing = store.get_all_documents(Collection::Equipment, false).await;
    assert_eq!(listing.data, Some(Vec::new()));
  }

  #[tokio::test]
  async fn test_purge_reports_listing_failure() {
    let (store, _clock) = setup();
    store.remote().set_failing(true);

    let purged = store.purge_collection(Collection::Equipment).await;
    assert!(!purged.success);
    assert_eq!(purged.data, None);
    assert_eq!(store.remote().calls("delete"), 0);
  }

  #[tokio::test]
  async fn test_counts_go_through_cache() {
    let (store, _clock) = setup();

    let counts = store
      .counts(&[Collection::Equipment, Collection::Sites, Collection::Users])
      .await;
    let summary: Vec<_> = counts.iter().map(|(c, r)| (*c, r.data)).collect();
    assert_eq!(
      summary,
      vec![
        (Collection::Equipment, Some(2)),
        (Collection::Sites, Some(1)),
        (Collection::Users, Some(0)),
      ]
    );

    store.counts(&[Collection::Equipment]).await;
    assert_eq!(store.remote().calls("fetch_all"), 3);
  }
}
