pub mod bundles;
pub mod cache;
pub mod clients;
pub mod completeness;
pub mod config;
pub mod server;
pub mod worker;

// Re-export commonly used types
pub use cache::{AssetError, AssetRequest, AssetResponse, CacheStorage, CacheStore};
pub use worker::{Event, Lifecycle, Outcome, Worker, WorkerError};

use url::Url;

pub type AppState = std::sync::Arc<AgentState>;

/// Shared state behind the HTTP surface
pub struct AgentState {
    pub worker: Worker,
    /// Origin intercepted paths are resolved against
    pub upstream: Url,
}

impl AgentState {
    pub fn new(worker: Worker, upstream: Url) -> Self {
        Self { worker, upstream }
    }
}

impl std::fmt::Debug for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentState")
            .field("worker", &self.worker)
            .field("upstream", &self.upstream.as_str())
            .finish()
    }
}

#[cfg(test)]
mod test_utils;
