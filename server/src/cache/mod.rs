//! Versioned response cache
//!
//! This module provides the request/response snapshot types, the
//! `CacheStorage` abstraction over a named-namespace blob store, and the
//! `CacheStore` adapter that pins every namespace name to the running
//! cache generation.

pub mod fetcher;
pub mod memory;
pub mod normalize;
pub mod sqlite;

use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Prefix shared by every namespace this agent creates
pub const NAMESPACE_PREFIX: &str = "hcsim-cache-";

/// Error type for caching operations
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Storage error: {0}")]
    Storage(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unknown bundle: {0}")]
    UnknownBundle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl AssetError {
    /// Transport-level fetch failures are the only errors a bulk download
    /// recovers from
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, AssetError::Fetch { .. })
    }
}

impl From<rusqlite::Error> for AssetError {
    fn from(e: rusqlite::Error) -> Self {
        AssetError::Database(e.to_string())
    }
}

/// Identity of a cacheable request (method + absolute URL)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetRequest {
    pub method: String,
    pub url: String,
}

impl AssetRequest {
    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.into(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }
}

impl std::fmt::Display for AssetRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Snapshot of a response: status line, headers and the buffered body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    /// Final URL the response came from (empty for synthesized responses)
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Whether the transport followed a redirect to produce this response
    pub redirected: bool,
}

impl AssetResponse {
    pub fn new(status: u16, status_text: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            url: String::new(),
            status,
            status_text: status_text.into(),
            headers: Vec::new(),
            body: body.into(),
            redirected: false,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// First header value matching `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Trait for the platform's named-namespace blob store
///
/// Each namespace maps request identities to response snapshots. This
/// abstraction allows for different storage backends (in-memory, SQLite)
/// behind the same cache semantics.
#[async_trait::async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the namespace if it does not exist yet
    async fn open(&self, namespace: &str) -> Result<(), AssetError>;

    /// Look up a stored response; a missing namespace is simply a miss
    async fn match_request(
        &self,
        namespace: &str,
        request: &AssetRequest,
    ) -> Result<Option<AssetResponse>, AssetError>;

    /// Store (or replace) the response for a request
    async fn put(
        &self,
        namespace: &str,
        request: &AssetRequest,
        response: &AssetResponse,
    ) -> Result<(), AssetError>;

    /// Names of all existing namespaces, oldest first
    async fn keys(&self) -> Result<Vec<String>, AssetError>;

    /// Drop a namespace and all of its entries
    ///
    /// Returns `false` if the namespace did not exist.
    async fn delete(&self, namespace: &str) -> Result<bool, AssetError>;

    /// Requests stored in a namespace, in insertion order
    async fn requests(&self, namespace: &str) -> Result<Vec<AssetRequest>, AssetError>;

    /// Get the storage type identifier (e.g., "memory", "sqlite")
    fn storage_type(&self) -> &str;
}

/// Namespace name for a given cache generation
pub fn namespace_for(version: &str) -> String {
    format!("{}{}", NAMESPACE_PREFIX, version)
}

/// Handle to one opened namespace
#[derive(Clone)]
pub struct CacheNamespace {
    storage: Arc<dyn CacheStorage>,
    name: String,
}

impl CacheNamespace {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn put(
        &self,
        request: &AssetRequest,
        response: &AssetResponse,
    ) -> Result<(), AssetError> {
        self.storage.put(&self.name, request, response).await
    }

    pub async fn lookup(&self, request: &AssetRequest) -> Result<Option<AssetResponse>, AssetError> {
        self.storage.match_request(&self.name, request).await
    }

    pub async fn requests(&self) -> Result<Vec<AssetRequest>, AssetError> {
        self.storage.requests(&self.name).await
    }
}

/// The only component allowed to touch the blob store
///
/// Every namespace name is derived here from the version tag, so reads and
/// writes always target the current generation.
#[derive(Clone)]
pub struct CacheStore {
    storage: Arc<dyn CacheStorage>,
    version: String,
}

impl CacheStore {
    pub fn new(storage: Arc<dyn CacheStorage>, version: impl Into<String>) -> Self {
        Self {
            storage,
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Name of the current-generation namespace
    pub fn namespace_name(&self) -> String {
        namespace_for(&self.version)
    }

    pub fn storage_type(&self) -> &str {
        self.storage.storage_type()
    }

    /// Probe the current namespace without creating it
    pub async fn lookup(&self, request: &AssetRequest) -> Result<Option<AssetResponse>, AssetError> {
        let hit = self
            .storage
            .match_request(&self.namespace_name(), request)
            .await?;
        debug!("Cache {} for {}", if hit.is_some() { "hit" } else { "miss" }, request);
        Ok(hit)
    }

    /// Open (creating if needed) the current namespace
    pub async fn open(&self) -> Result<CacheNamespace, AssetError> {
        let name = self.namespace_name();
        self.storage.open(&name).await?;
        Ok(CacheNamespace {
            storage: self.storage.clone(),
            name,
        })
    }

    pub async fn list_namespaces(&self) -> Result<Vec<String>, AssetError> {
        self.storage.keys().await
    }

    pub async fn delete_namespace(&self, name: &str) -> Result<bool, AssetError> {
        let deleted = self.storage.delete(name).await?;
        if deleted {
            info!("Deleted cache namespace {}", name);
        }
        Ok(deleted)
    }

    /// Delete every namespace except the current generation's
    pub async fn delete_stale_namespaces(&self) -> Result<Vec<String>, AssetError> {
        let current = self.namespace_name();
        let mut deleted = Vec::new();
        for name in self.list_namespaces().await? {
            if name != current && self.delete_namespace(&name).await? {
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Delete every namespace, the current generation included
    pub async fn delete_all_namespaces(&self) -> Result<Vec<String>, AssetError> {
        let mut deleted = Vec::new();
        for name in self.list_namespaces().await? {
            if self.delete_namespace(&name).await? {
                deleted.push(name);
            }
        }
        Ok(deleted)
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("storage", &self.storage.storage_type())
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryCacheStorage;
    use super::*;

    fn store(version: &str, storage: Arc<MemoryCacheStorage>) -> CacheStore {
        CacheStore::new(storage, version)
    }

    #[test]
    fn test_namespace_name() {
        let store = store("v1", Arc::new(MemoryCacheStorage::new()));
        assert_eq!(store.namespace_name(), "hcsim-cache-v1");
    }

    #[test]
    fn test_request_method_is_uppercased() {
        let request = AssetRequest::new("get", "http://app.test/x.js");
        assert_eq!(request, AssetRequest::get("http://app.test/x.js"));
        assert_eq!(request.to_string(), "GET http://app.test/x.js");
    }

    #[tokio::test]
    async fn test_lookup_does_not_create_namespace() {
        let store = store("v1", Arc::new(MemoryCacheStorage::new()));

        let hit = store.lookup(&AssetRequest::get("/x.js")).await.unwrap();
        assert!(hit.is_none());
        assert!(store.list_namespaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_only_sees_current_generation() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let old = store("v0", storage.clone());
        let current = store("v1", storage);
        let request = AssetRequest::get("/x.js");

        old.open()
            .await
            .unwrap()
            .put(&request, &AssetResponse::new(200, "OK", "old"))
            .await
            .unwrap();

        assert!(current.lookup(&request).await.unwrap().is_none());
        assert!(old.lookup(&request).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_stale_spares_current() {
        let storage = Arc::new(MemoryCacheStorage::new());
        store("v0", storage.clone()).open().await.unwrap();
        storage.open("unrelated").await.unwrap();
        let current = store("v1", storage);
        current.open().await.unwrap();

        let deleted = current.delete_stale_namespaces().await.unwrap();
        assert_eq!(deleted, vec!["hcsim-cache-v0".to_string(), "unrelated".to_string()]);
        assert_eq!(current.list_namespaces().await.unwrap(), vec!["hcsim-cache-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_all_namespaces() {
        let storage = Arc::new(MemoryCacheStorage::new());
        store("v0", storage.clone()).open().await.unwrap();
        let current = store("v1", storage);
        current.open().await.unwrap();

        let deleted = current.delete_all_namespaces().await.unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(current.list_namespaces().await.unwrap().is_empty());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = AssetResponse::new(200, "OK", "body").with_header("Content-Type", "text/javascript");
        assert_eq!(response.header("content-type"), Some("text/javascript"));
        assert_eq!(response.header("etag"), None);
    }
}
