use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;
use url::Url;

use super::api_types::{
  ApiDocument, ApiErrorBody, ApiListDocumentsResponse, ApiRunQueryItem, ApiRunQueryRequest,
};
use crate::cache::Collection;
use crate::config::{Config, FirestoreConfig};
use crate::remote::{Condition, Document, DocumentStore, Fields, Response};

const PAGE_SIZE: &str = "300";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Firestore REST API client
#[derive(Clone)]
pub struct FirestoreClient {
  http: reqwest::Client,
  /// `.../projects/{project}/databases/{database}/documents`
  root: Url,
  token: Option<String>,
}

impl FirestoreClient {
  pub fn new(config: &FirestoreConfig) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      root: Self::documents_root(config)?,
      token: Config::get_token(),
    })
  }

  fn documents_root(config: &FirestoreConfig) -> Result<Url> {
    let mut root = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid Firestore base URL {}: {}", config.base_url, e))?;

    root
      .path_segments_mut()
      .map_err(|_| eyre!("Firestore base URL cannot be a base: {}", config.base_url))?
      .pop_if_empty()
      .extend([
        "v1",
        "projects",
        config.project_id.as_str(),
        "databases",
        config.database.as_str(),
        "documents",
      ]);

    Ok(root)
  }

  fn url(&self, segments: &[&str]) -> Result<Url> {
    join(&self.root, segments)
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let request = self.http.request(method, url);
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  /// Send a request. `Ok(None)` means the resource doesn't exist.
  async fn execute(&self, request: RequestBuilder) -> Result<Option<reqwest::Response>> {
    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Firestore request failed: {}", e))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    if status.is_success() {
      return Ok(Some(response));
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
      .map(|b| format!("{} {}", b.error.status, b.error.message))
      .unwrap_or(body);

    Err(eyre!("Firestore returned {}: {}", status, message.trim()))
  }

  async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    response
      .json::<T>()
      .await
      .map_err(|e| eyre!("Failed to parse Firestore response: {}", e))
  }

  /// List every document in a collection, following pagination.
  pub async fn list_documents(&self, collection: Collection) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
      let mut url = self.url(&[collection.as_str()])?;
      {
        let mut query = url.query_pairs_mut();
        query.append_pair("pageSize", PAGE_SIZE);
        if let Some(token) = &page_token {
          query.append_pair("pageToken", token);
        }
      }

      let Some(response) = self.execute(self.request(Method::GET, url)).await? else {
        break;
      };
      let page: ApiListDocumentsResponse = Self::read_json(response).await?;

      documents.extend(page.documents.into_iter().map(ApiDocument::into_document));

      match page.next_page_token {
        Some(token) if !token.is_empty() => page_token = Some(token),
        _ => break,
      }
    }

    Ok(documents)
  }

  /// Get a single document, `None` if it doesn't exist.
  pub async fn get_document(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
    let url = self.url(&[collection.as_str(), id])?;

    match self.execute(self.request(Method::GET, url)).await? {
      Some(response) => {
        let doc: ApiDocument = Self::read_json(response).await?;
        Ok(Some(doc.into_document()))
      }
      None => Ok(None),
    }
  }

  /// Create a document with a server-generated id.
  pub async fn create_document(&self, collection: Collection, data: Fields) -> Result<String> {
    let url = self.url(&[collection.as_str()])?;
    let request = self
      .request(Method::POST, url)
      .json(&ApiDocument::from_fields(data));

    let response = self
      .execute(request)
      .await?
      .ok_or_else(|| eyre!("Collection {} not found", collection))?;
    let doc: ApiDocument = Self::read_json(response).await?;

    Ok(doc.id().to_string())
  }

  /// Merge fields into a document, creating it when missing.
  ///
  /// Only the given top-level fields are written; the rest of the document
  /// is left alone.
  pub async fn patch_document(&self, collection: Collection, id: &str, data: Fields) -> Result<()> {
    if data.is_empty() {
      return Ok(());
    }

    let mut url = self.url(&[collection.as_str(), id])?;
    {
      let mut query = url.query_pairs_mut();
      for field in data.keys() {
        query.append_pair("updateMask.fieldPaths", &field_path(field));
      }
    }

    let request = self
      .request(Method::PATCH, url)
      .json(&ApiDocument::from_fields(data));
    self
      .execute(request)
      .await?
      .ok_or_else(|| eyre!("Document {}/{} could not be written", collection, id))?;

    Ok(())
  }

  /// Delete a document. Deleting a missing document succeeds.
  pub async fn delete_document(&self, collection: Collection, id: &str) -> Result<()> {
    let url = self.url(&[collection.as_str(), id])?;
    self.execute(self.request(Method::DELETE, url)).await?;
    Ok(())
  }

  /// Run a structured query with every condition ANDed.
  pub async fn run_query(
    &self,
    collection: Collection,
    conditions: &[Condition],
  ) -> Result<Vec<Document>> {
    let url = Url::parse(&format!("{}:runQuery", self.root))
      .map_err(|e| eyre!("Invalid Firestore query URL: {}", e))?;
    let request = self
      .request(Method::POST, url)
      .json(&ApiRunQueryRequest::new(collection.as_str(), conditions));

    let Some(response) = self.execute(request).await? else {
      return Ok(Vec::new());
    };
    let items: Vec<ApiRunQueryItem> = Self::read_json(response).await?;

    Ok(
      items
        .into_iter()
        .filter_map(|item| item.document)
        .map(ApiDocument::into_document)
        .collect(),
    )
  }
}

/// URL of a collection or document below the documents root.
fn join(root: &Url, segments: &[&str]) -> Result<Url> {
  let mut url = root.clone();
  url
    .path_segments_mut()
    .map_err(|_| eyre!("Invalid Firestore URL: {}", root))?
    .extend(segments);
  Ok(url)
}

/// Field path for an update mask; names that aren't plain identifiers are
/// backtick-quoted.
fn field_path(name: &str) -> String {
  let mut chars = name.chars();
  let simple = chars
    .next()
    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

  if simple {
    name.to_string()
  } else {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
  }
}

fn failed<T>(operation: &str, e: color_eyre::Report) -> Response<T> {
  warn!(operation, error = %e, "Firestore call failed");
  Response::failed(e.to_string())
}

#[async_trait]
impl DocumentStore for FirestoreClient {
  async fn fetch_all(&self, collection: Collection) -> Response<Vec<Document>> {
    match self.list_documents(collection).await {
      Ok(docs) => Response::ok(docs),
      Err(e) => failed("list", e),
    }
  }

  async fn fetch_one(&self, collection: Collection, id: &str) -> Response<Document> {
    match self.get_document(collection, id).await {
      Ok(Some(doc)) => Response::ok(doc),
      Ok(None) => Response::failed("Document not found"),
      Err(e) => failed("get", e),
    }
  }

  async fn create(&self, collection: Collection, data: Fields) -> Response<String> {
    match self.create_document(collection, data).await {
      Ok(id) => Response::ok(id),
      Err(e) => failed("create", e),
    }
  }

  async fn upsert(&self, collection: Collection, id: &str, data: Fields) -> Response<()> {
    match self.patch_document(collection, id, data).await {
      Ok(()) => Response::ok(()),
      Err(e) => failed("update", e),
    }
  }

  async fn delete(&self, collection: Collection, id: &str) -> Response<()> {
    match self.delete_document(collection, id).await {
      Ok(()) => Response::ok(()),
      Err(e) => failed("delete", e),
    }
  }

  async fn query(
    &self,
    collection: Collection,
    conditions: &[Condition],
  ) -> Response<Vec<Document>> {
    match self.run_query(collection, conditions).await {
      Ok(docs) => Response::ok(docs),
      Err(e) => failed("query", e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(base_url: &str) -> FirestoreConfig {
    FirestoreConfig {
      project_id: "hvac-prod".to_string(),
      database: "(default)".to_string(),
      base_url: base_url.to_string(),
    }
  }

  #[test]
  fn test_document_urls() {
    let root = FirestoreClient::documents_root(&config("https://firestore.googleapis.com")).unwrap();

    assert_eq!(
      join(&root, &["equipment"]).unwrap().as_str(),
      "https://firestore.googleapis.com/v1/projects/hvac-prod/databases/(default)/documents/equipment"
    );
    assert_eq!(
      join(&root, &["equipment", "EQ 01/x"]).unwrap().as_str(),
      "https://firestore.googleapis.com/v1/projects/hvac-prod/databases/(default)/documents/equipment/EQ%2001%2Fx"
    );
  }

  #[test]
  fn test_emulator_base_url_with_trailing_slash() {
    let root = FirestoreClient::documents_root(&config("http://localhost:8080/")).unwrap();
    assert_eq!(
      root.as_str(),
      "http://localhost:8080/v1/projects/hvac-prod/databases/(default)/documents"
    );
  }

  #[test]
  fn test_invalid_base_url() {
    assert!(FirestoreClient::documents_root(&config("not a url")).is_err());
  }

  #[test]
  fn test_field_path_quoting() {
    assert_eq!(field_path("model"), "model");
    assert_eq!(field_path("_last_check2"), "_last_check2");
    assert_eq!(field_path("2nd"), "`2nd`");
    assert_eq!(field_path("unit price"), "`unit price`");
    assert_eq!(field_path("a`b"), "`a\\`b`");
  }
}
