//! Network fetching and the fetch-or-cache chokepoint

use crate::cache::normalize::normalize;
use crate::cache::{AssetError, AssetRequest, AssetResponse, CacheStore};
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Default transport timeout for upstream fetches
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for the platform's network primitive
///
/// Only transport failures are errors; any HTTP status, 4xx and 5xx
/// included, is a successful fetch at this layer.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, AssetError>;
}

/// reqwest-backed fetcher
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, AssetError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| AssetError::Storage(Box::new(e)))?;
        Ok(Self { client })
    }
}

fn fetch_error(request: &AssetRequest, reason: impl std::fmt::Display) -> AssetError {
    AssetError::Fetch {
        url: request.url.clone(),
        reason: reason.to_string(),
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, AssetError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| fetch_error(request, e))?;
        let requested = Url::parse(&request.url)
            .map_err(|e| fetch_error(request, e))?;

        let response = self
            .client
            .request(method, requested.clone())
            .send()
            .await
            .map_err(|e| fetch_error(request, e))?;

        let status = response.status();
        let final_url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = response.bytes().await.map_err(|e| fetch_error(request, e))?;

        debug!("Fetched {} bytes from {} ({})", body.len(), request, status);

        Ok(AssetResponse {
            redirected: final_url != requested,
            url: final_url.to_string(),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }
}

/// Serve a request from the current cache generation, or fetch and store it.
///
/// A cache hit never touches the network. On a miss the fetched response is
/// normalized and the normalized copy is stored, while the caller gets the
/// original response as fetched.
pub async fn fetch_or_cache(
    request: &AssetRequest,
    store: &CacheStore,
    fetcher: &dyn Fetcher,
) -> Result<AssetResponse, AssetError> {
    debug!("Searching for resource: {}", request);
    if let Some(cached) = store.lookup(request).await? {
        return Ok(cached);
    }

    let response = fetcher.fetch(request).await?;
    let namespace = store.open().await?;
    info!("Caching new resource: {}", request);
    namespace.put(request, &normalize(&response)).await?;

    Ok(response)
}
