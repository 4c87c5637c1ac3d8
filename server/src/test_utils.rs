//! Shared fakes for unit tests

use crate::cache::fetcher::Fetcher;
use crate::cache::{AssetError, AssetRequest, AssetResponse};
use std::collections::HashMap;
use std::sync::Mutex;

enum Scripted {
    Respond(AssetResponse),
    Fail,
}

/// Fetcher answering from a fixed table and counting calls per URL
///
/// URLs without an entry fail like an unreachable host.
#[derive(Default)]
pub struct StaticFetcher {
    table: HashMap<String, Scripted>,
    calls: Mutex<HashMap<String, usize>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(self, url: &str, body: &'static str) -> Self {
        let response = AssetResponse {
            url: url.to_string(),
            ..AssetResponse::new(200, "OK", body)
        };
        self.with_response(url, response)
    }

    pub fn with_response(mut self, url: &str, response: AssetResponse) -> Self {
        self.table.insert(url.to_string(), Scripted::Respond(response));
        self
    }

    pub fn with_failure(mut self, url: &str) -> Self {
        self.table.insert(url.to_string(), Scripted::Fail);
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait::async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, AssetError> {
        *self.calls.lock().unwrap().entry(request.url.clone()).or_insert(0) += 1;
        match self.table.get(&request.url) {
            Some(Scripted::Respond(response)) => Ok(response.clone()),
            Some(Scripted::Fail) | None => Err(AssetError::Fetch {
                url: request.url.clone(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}
