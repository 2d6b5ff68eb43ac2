//! In-memory document store that records calls, for tests.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{Condition, Document, DocumentStore, Fields, Operator, Response};
use crate::cache::Collection;

#[derive(Default)]
pub struct FakeStore {
  docs: Mutex<BTreeMap<Collection, BTreeMap<String, Fields>>>,
  calls: Mutex<Vec<String>>,
  next_id: AtomicUsize,
  failing: AtomicBool,
}

impl FakeStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, collection: Collection, id: &str, fields: Value) {
    let fields = match fields {
      Value::Object(map) => map,
      _ => Fields::new(),
    };
    self
      .docs
      .lock()
      .unwrap()
      .entry(collection)
      .or_default()
      .insert(id.to_string(), fields);
  }

  /// Make every following call fail until reset.
  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Number of recorded calls whose name starts with `op`.
  pub fn calls(&self, op: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|c| c.starts_with(op))
      .count()
  }

  /// Record a call and report whether it should fail.
  fn record(&self, call: String) -> bool {
    self.calls.lock().unwrap().push(call);
    self.failing.load(Ordering::SeqCst)
  }

  fn list(&self, collection: Collection) -> Vec<Document> {
    self
      .docs
      .lock()
      .unwrap()
      .get(&collection)
      .map(|docs| {
        docs
          .iter()
          .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
          .collect()
      })
      .unwrap_or_default()
  }
}

fn compare(a: &Value, b: &Value) -> Option<CmpOrdering> {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
    (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
    _ => None,
  }
}

fn matches(doc: &Document, condition: &Condition) -> bool {
  let Some(field) = doc.fields.get(&condition.field) else {
    return false;
  };
  let value = &condition.value;
  let listed = |v: &Value| value.as_array().is_some_and(|list| list.contains(v));

  match condition.op {
    Operator::Equal => field == value,
    Operator::NotEqual => field != value,
    Operator::LessThan => compare(field, value) == Some(CmpOrdering::Less),
    Operator::LessThanOrEqual => {
      matches!(compare(field, value), Some(CmpOrdering::Less | CmpOrdering::Equal))
    }
    Operator::GreaterThan => compare(field, value) == Some(CmpOrdering::Greater),
    Operator::GreaterThanOrEqual => {
      matches!(compare(field, value), Some(CmpOrdering::Greater | CmpOrdering::Equal))
    }
    Operator::ArrayContains => field.as_array().is_some_and(|items| items.contains(value)),
    Operator::In => listed(field),
    Operator::ArrayContainsAny => field
      .as_array()
      .is_some_and(|items| items.iter().any(|item| listed(item))),
    Operator::NotIn => !listed(field),
  }
}

#[async_trait]
impl DocumentStore for FakeStore {
  async fn fetch_all(&self, collection: Collection) -> Response<Vec<Document>> {
    if self.record(format!("fetch_all:{}", collection)) {
      return Response::failed("unavailable");
    }
    Response::ok(self.list(collection))
  }

  async fn fetch_one(&self, collection: Collection, id: &str) -> Response<Document> {
    if self.record(format!("fetch_one:{}/{}", collection, id)) {
      return Response::failed("unavailable");
    }
    self
      .list(collection)
      .into_iter()
      .find(|d| d.id == id)
      .map(Response::ok)
      .unwrap_or_else(|| Response::failed("Document not found"))
  }

  async fn create(&self, collection: Collection, data: Fields) -> Response<String> {
    if self.record(format!("create:{}", collection)) {
      return Response::failed("unavailable");
    }
    let id = format!("DOC{:04}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
    self.insert(collection, &id, Value::Object(data));
    Response::ok(id)
  }

  async fn upsert(&self, collection: Collection, id: &str, data: Fields) -> Response<()> {
    if self.record(format!("upsert:{}/{}", collection, id)) {
      return Response::failed("unavailable");
    }
    let mut docs = self.docs.lock().unwrap();
    let doc = docs
      .entry(collection)
      .or_default()
      .entry(id.to_string())
      .or_default();
    doc.extend(data);
    Response::ok(())
  }

  async fn delete(&self, collection: Collection, id: &str) -> Response<()> {
    if self.record(format!("delete:{}/{}", collection, id)) {
      return Response::failed("unavailable");
    }
    if let Some(docs) = self.docs.lock().unwrap().get_mut(&collection) {
      docs.remove(id);
    }
    Response::ok(())
  }

  async fn query(
    &self,
    collection: Collection,
    conditions: &[Condition],
  ) -> Response<Vec<Document>> {
    if self.record(format!("query:{}", collection)) {
      return Response::failed("unavailable");
    }
    let docs = self
      .list(collection)
      .into_iter()
      .filter(|doc| conditions.iter().all(|c| matches(doc, c)))
      .collect();
    Response::ok(docs)
  }
}
