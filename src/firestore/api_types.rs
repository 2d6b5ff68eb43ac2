//! Serde types matching Firestore REST API payloads.
//!
//! Firestore wraps every field in a typed value (`{"stringValue": "..."}`).
//! These types convert between that encoding and plain JSON documents.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

use crate::remote::{Condition, Document, Fields, Operator};

// ============================================================================
// Typed values
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiLatLng {
  #[serde(default)]
  pub latitude: f64,
  #[serde(default)]
  pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiArrayValue {
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub values: Vec<ApiValue>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiMapValue {
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub fields: BTreeMap<String, ApiValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiValue {
  NullValue(()),
  BooleanValue(bool),
  /// int64 values travel as decimal strings
  IntegerValue(String),
  DoubleValue(f64),
  TimestampValue(String),
  StringValue(String),
  BytesValue(String),
  ReferenceValue(String),
  GeoPointValue(ApiLatLng),
  ArrayValue(ApiArrayValue),
  MapValue(ApiMapValue),
}

impl ApiValue {
  /// Plain JSON for a typed value.
  pub fn into_json(self) -> Value {
    match self {
      ApiValue::NullValue(()) => Value::Null,
      ApiValue::BooleanValue(b) => Value::Bool(b),
      ApiValue::IntegerValue(s) => s
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or(Value::String(s)),
      ApiValue::DoubleValue(d) => Number::from_f64(d).map(Value::Number).unwrap_or(Value::Null),
      ApiValue::TimestampValue(s)
      | ApiValue::StringValue(s)
      | ApiValue::BytesValue(s)
      | ApiValue::ReferenceValue(s) => Value::String(s),
      ApiValue::GeoPointValue(p) => serde_json::json!({
        "latitude": p.latitude,
        "longitude": p.longitude
      }),
      ApiValue::ArrayValue(a) => Value::Array(a.values.into_iter().map(ApiValue::into_json).collect()),
      ApiValue::MapValue(m) => Value::Object(fields_to_json(m.fields)),
    }
  }

  /// Typed value for plain JSON. Strings always stay strings; see
  /// [`TIMESTAMP_FIELDS`] for the fields sent as timestamps.
  pub fn from_json(value: Value) -> Self {
    match value {
      Value::Null => ApiValue::NullValue(()),
      Value::Bool(b) => ApiValue::BooleanValue(b),
      Value::Number(n) => match n.as_i64() {
        Some(i) => ApiValue::IntegerValue(i.to_string()),
        None => ApiValue::DoubleValue(n.as_f64().unwrap_or_default()),
      },
      Value::String(s) => ApiValue::StringValue(s),
      Value::Array(items) => ApiValue::ArrayValue(ApiArrayValue {
        values: items.into_iter().map(ApiValue::from_json).collect(),
      }),
      Value::Object(map) => ApiValue::MapValue(ApiMapValue {
        fields: fields_from_json(map),
      }),
    }
  }
}

/// Top-level document fields written as timestamps so they order by date on
/// the server.
pub const TIMESTAMP_FIELDS: [&str; 1] = ["inspection_date"];

/// RFC 3339 values pass through; a bare `YYYY-MM-DD` date means midnight UTC.
fn parse_timestamp(s: &str) -> Option<String> {
  if DateTime::parse_from_rfc3339(s).is_ok() {
    return Some(s.to_string());
  }
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .ok()
    .map(|date| format!("{}T00:00:00Z", date.format("%Y-%m-%d")))
}

/// Typed value for a top-level document field.
fn field_value(name: &str, value: Value) -> ApiValue {
  match value {
    Value::String(s) if TIMESTAMP_FIELDS.contains(&name) => match parse_timestamp(&s) {
      Some(ts) => ApiValue::TimestampValue(ts),
      None => ApiValue::StringValue(s),
    },
    other => ApiValue::from_json(other),
  }
}

pub fn fields_to_json(fields: BTreeMap<String, ApiValue>) -> Map<String, Value> {
  fields
    .into_iter()
    .map(|(k, v)| (k, v.into_json()))
    .collect()
}

pub fn fields_from_json(fields: Fields) -> BTreeMap<String, ApiValue> {
  fields
    .into_iter()
    .map(|(k, v)| (k, ApiValue::from_json(v)))
    .collect()
}

// ============================================================================
// Documents
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDocument {
  /// Full resource name; the document id is the last segment
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub name: String,
  #[serde(default)]
  pub fields: BTreeMap<String, ApiValue>,
  #[serde(default, skip_serializing)]
  pub create_time: Option<String>,
  #[serde(default, skip_serializing)]
  pub update_time: Option<String>,
}

impl ApiDocument {
  /// Request body for a write. Date fields become timestamps.
  pub fn from_fields(fields: Fields) -> Self {
    let fields = fields
      .into_iter()
      .map(|(name, value)| {
        let value = field_value(&name, value);
        (name, value)
      })
      .collect();
    Self {
      name: String::new(),
      fields,
      create_time: None,
      update_time: None,
    }
  }

  pub fn id(&self) -> &str {
    self.name.rsplit('/').next().unwrap_or_default()
  }

  pub fn into_document(self) -> Document {
    let id = self.id().to_string();
    Document::new(id, fields_to_json(self.fields))
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiListDocumentsResponse {
  #[serde(default)]
  pub documents: Vec<ApiDocument>,
  pub next_page_token: Option<String>,
}

/// One element of a `runQuery` response stream.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRunQueryItem {
  pub document: Option<ApiDocument>,
}

// ============================================================================
// Structured queries
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRunQueryRequest {
  pub structured_query: ApiStructuredQuery,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCollectionSelector {
  pub collection_id: String,
}

#[derive(Debug, Serialize)]
pub struct ApiStructuredQuery {
  pub from: Vec<ApiCollectionSelector>,
  #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
  pub filter: Option<ApiFilter>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiFieldReference {
  pub field_path: String,
}

#[derive(Debug, Serialize)]
pub struct ApiFieldFilter {
  pub field: ApiFieldReference,
  pub op: &'static str,
  pub value: ApiValue,
}

#[derive(Debug, Serialize)]
pub struct ApiCompositeFilter {
  pub op: &'static str,
  pub filters: Vec<ApiFilter>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiFilter {
  FieldFilter(ApiFieldFilter),
  CompositeFilter(ApiCompositeFilter),
}

fn operator_name(op: Operator) -> &'static str {
  match op {
    Operator::Equal => "EQUAL",
    Operator::NotEqual => "NOT_EQUAL",
    Operator::LessThan => "LESS_THAN",
    Operator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
    Operator::GreaterThan => "GREATER_THAN",
    Operator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
    Operator::ArrayContains => "ARRAY_CONTAINS",
    Operator::In => "IN",
    Operator::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
    Operator::NotIn => "NOT_IN",
  }
}

impl From<&Condition> for ApiFilter {
  fn from(c: &Condition) -> Self {
    ApiFilter::FieldFilter(ApiFieldFilter {
      field: ApiFieldReference {
        field_path: c.field.clone(),
      },
      op: operator_name(c.op),
      value: ApiValue::from_json(c.value.clone()),
    })
  }
}

impl ApiRunQueryRequest {
  /// Query over one collection with every condition ANDed together.
  pub fn new(collection: &str, conditions: &[Condition]) -> Self {
    let mut filters: Vec<ApiFilter> = conditions.iter().map(ApiFilter::from).collect();
    let filter = match filters.len() {
      0 => None,
      1 => filters.pop(),
      _ => Some(ApiFilter::CompositeFilter(ApiCompositeFilter {
        op: "AND",
        filters,
      })),
    };

    Self {
      structured_query: ApiStructuredQuery {
        from: vec![ApiCollectionSelector {
          collection_id: collection.to_string(),
        }],
        filter,
      },
    }
  }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  pub error: ApiError,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
  #[serde(default)]
  pub code: u16,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub status: String,
}
