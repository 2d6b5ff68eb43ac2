//! Typed collection names and cache key construction.

use color_eyre::{eyre::eyre, Report};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix shared by every key this cache owns.
pub const KEY_PREFIX: &str = "cache_";

/// Collections known to the facilities-maintenance document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
  Sites,
  Buildings,
  Equipment,
  Inspections,
  Inspectors,
  Users,
}

impl Collection {
  pub const ALL: [Collection; 6] = [
    Collection::Sites,
    Collection::Buildings,
    Collection::Equipment,
    Collection::Inspections,
    Collection::Inspectors,
    Collection::Users,
  ];

  /// Collection name as stored remotely.
  pub fn as_str(&self) -> &'static str {
    match self {
      Collection::Sites => "sites",
      Collection::Buildings => "buildings",
      Collection::Equipment => "equipment",
      Collection::Inspections => "inspections",
      Collection::Inspectors => "inspectors",
      Collection::Users => "users",
    }
  }

  /// Whether `key` lives in this collection's cache namespace.
  ///
  /// Covers the collection-level key itself and every document-level key
  /// derived from it.
  pub fn owns_key(&self, key: &str) -> bool {
    let Some(rest) = key
      .strip_prefix(KEY_PREFIX)
      .and_then(|k| k.strip_prefix(self.as_str()))
    else {
      return false;
    };
    rest.is_empty() || rest.starts_with('_')
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Collection {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let lower = s.trim().to_lowercase();
    Collection::ALL
      .into_iter()
      .find(|c| c.as_str() == lower)
      .ok_or_else(|| eyre!("Unknown collection: {}", s))
  }
}

/// Key under which a cached response is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
  /// "All documents in a collection"
  Collection(Collection),
  /// One document by id
  Document(Collection, String),
}

impl CacheKey {
  pub fn collection(collection: Collection) -> Self {
    Self::Collection(collection)
  }

  pub fn document(collection: Collection, id: impl Into<String>) -> Self {
    Self::Document(collection, id.into())
  }

  /// The collection whose namespace this key belongs to.
  pub fn owner(&self) -> Collection {
    match self {
      Self::Collection(c) | Self::Document(c, _) => *c,
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Collection(c) => write!(f, "{}{}", KEY_PREFIX, c),
      Self::Document(c, id) => write!(f, "{}{}_{}", KEY_PREFIX, c, id),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_format() {
    assert_eq!(CacheKey::collection(Collection::Sites).to_string(), "cache_sites");
    assert_eq!(
      CacheKey::document(Collection::Equipment, "EQ0001").to_string(),
      "cache_equipment_EQ0001"
    );
  }

  #[test]
  fn test_parse_collection() {
    assert_eq!("Equipment".parse::<Collection>().unwrap(), Collection::Equipment);
    assert_eq!(" users ".parse::<Collection>().unwrap(), Collection::Users);
    assert!("equip".parse::<Collection>().is_err());
  }

  #[test]
  fn test_namespace_ownership() {
    let c = Collection::Inspections;
    assert!(c.owns_key("cache_inspections"));
    assert!(c.owns_key("cache_inspections_INS_42"));
    assert!(!c.owns_key("cache_inspectors"));
    assert!(!c.owns_key("cache_inspectors_U1"));
    assert!(!c.owns_key("inspections"));
    assert!(!c.owns_key("cache_inspectionsX"));
  }

  #[test]
  fn test_document_key_owner() {
    let key = CacheKey::document(Collection::Buildings, "B1");
    assert_eq!(key.owner(), Collection::Buildings);
    assert!(key.owner().owns_key(&key.to_string()));
  }
}
