//! Remote document store contract and the cached access layer over it.

mod cached;
#[cfg(test)]
mod fake;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Report};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::cache::Collection;

pub use cached::CachedDocumentStore;

/// Document fields, keyed by field name.
pub type Fields = Map<String, Value>;

/// Envelope every remote operation answers with.
///
/// Failures are reported in-band with `success: false` and an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<T> {
  pub success: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<T>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl<T> Response<T> {
  pub fn ok(data: T) -> Self {
    Self {
      success: true,
      data: Some(data),
      error: None,
    }
  }

  pub fn failed(error: impl Into<String>) -> Self {
    Self {
      success: false,
      data: None,
      error: Some(error.into()),
    }
  }

  pub fn is_success(&self) -> bool {
    self.success
  }

  /// Transform the payload, keeping the success flag and error.
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
    Response {
      success: self.success,
      data: self.data.map(f),
      error: self.error,
    }
  }
}

/// A stored document: its id plus its fields.
///
/// Serializes as `{"id": ..., "fields": {...}}`. Fields are kept nested so a
/// body that carries its own `id` survives a round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  pub id: String,
  #[serde(default)]
  pub fields: Fields,
}

impl Document {
  pub fn new(id: impl Into<String>, fields: Fields) -> Self {
    Self {
      id: id.into(),
      fields,
    }
  }
}

/// Comparison operator for a query condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
  #[serde(rename = "==")]
  Equal,
  #[serde(rename = "!=")]
  NotEqual,
  #[serde(rename = "<")]
  LessThan,
  #[serde(rename = "<=")]
  LessThanOrEqual,
  #[serde(rename = ">")]
  GreaterThan,
  #[serde(rename = ">=")]
  GreaterThanOrEqual,
  #[serde(rename = "array-contains")]
  ArrayContains,
  #[serde(rename = "in")]
  In,
  #[serde(rename = "array-contains-any")]
  ArrayContainsAny,
  #[serde(rename = "not-in")]
  NotIn,
}

impl Operator {
  const ALL: [Operator; 10] = [
    Operator::Equal,
    Operator::NotEqual,
    Operator::LessThan,
    Operator::LessThanOrEqual,
    Operator::GreaterThan,
    Operator::GreaterThanOrEqual,
    Operator::ArrayContains,
    Operator::In,
    Operator::ArrayContainsAny,
    Operator::NotIn,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Operator::Equal => "==",
      Operator::NotEqual => "!=",
      Operator::LessThan => "<",
      Operator::LessThanOrEqual => "<=",
      Operator::GreaterThan => ">",
      Operator::GreaterThanOrEqual => ">=",
      Operator::ArrayContains => "array-contains",
      Operator::In => "in",
      Operator::ArrayContainsAny => "array-contains-any",
      Operator::NotIn => "not-in",
    }
  }
}

impl fmt::Display for Operator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Operator {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Operator::ALL
      .into_iter()
      .find(|op| op.as_str() == s.trim())
      .ok_or_else(|| eyre!("Unknown operator: {}", s))
  }
}

/// A single `field op value` filter. Multiple conditions are ANDed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
  pub field: String,
  #[serde(rename = "operator")]
  pub op: Operator,
  pub value: Value,
}

impl Condition {
  pub fn new(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
    Self {
      field: field.into(),
      op,
      value: value.into(),
    }
  }
}

/// Parses `field:op:value`. The value is read as JSON when it parses as
/// JSON, otherwise it is taken as a plain string.
impl FromStr for Condition {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut parts = s.splitn(3, ':');
    let (Some(field), Some(op), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
      return Err(eyre!("Expected field:op:value, got '{}'", s));
    };

    let field = field.trim();
    if field.is_empty() {
      return Err(eyre!("Condition '{}' has an empty field name", s));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));

    Ok(Condition::new(field, op.parse()?, value))
  }
}

/// Remote document store.
///
/// Every operation answers with a [`Response`] envelope; transport and
/// server failures come back as `success: false`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
  /// Every document in a collection.
  async fn fetch_all(&self, collection: Collection) -> Response<Vec<Document>>;

  /// One document by id.
  async fn fetch_one(&self, collection: Collection, id: &str) -> Response<Document>;

  /// Create a document with a generated id, answering with that id.
  async fn create(&self, collection: Collection, data: Fields) -> Response<String>;

  /// Merge `data` into the document, creating it if needed.
  async fn upsert(&self, collection: Collection, id: &str, data: Fields) -> Response<()>;

  async fn delete(&self, collection: Collection, id: &str) -> Response<()>;

  /// Documents matching every condition.
  async fn query(&self, collection: Collection, conditions: &[Condition])
    -> Response<Vec<Document>>;
}
