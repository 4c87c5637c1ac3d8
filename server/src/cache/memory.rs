//! In-memory implementation of the CacheStorage trait

use crate::cache::{AssetError, AssetRequest, AssetResponse, CacheStorage};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

type Namespace = Vec<(AssetRequest, AssetResponse)>;

/// Process-local blob store; namespaces and entries keep insertion order
#[derive(Default)]
pub struct MemoryCacheStorage {
    namespaces: Mutex<Vec<(String, Namespace)>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<(String, Namespace)>>, AssetError> {
        self.namespaces
            .lock()
            .map_err(|_| AssetError::LockPoisoned("memory cache storage"))
    }
}

#[async_trait::async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, namespace: &str) -> Result<(), AssetError> {
        let mut namespaces = self.lock()?;
        if !namespaces.iter().any(|(name, _)| name == namespace) {
            debug!("Created namespace {}", namespace);
            namespaces.push((namespace.to_string(), Vec::new()));
        }
        Ok(())
    }

    async fn match_request(
        &self,
        namespace: &str,
        request: &AssetRequest,
    ) -> Result<Option<AssetResponse>, AssetError> {
        let namespaces = self.lock()?;
        Ok(namespaces
            .iter()
            .find(|(name, _)| name == namespace)
            .and_then(|(_, entries)| entries.iter().find(|(key, _)| key == request))
            .map(|(_, response)| response.clone()))
    }

    async fn put(
        &self,
        namespace: &str,
        request: &AssetRequest,
        response: &AssetResponse,
    ) -> Result<(), AssetError> {
        let mut namespaces = self.lock()?;
        let index = match namespaces.iter().position(|(name, _)| name == namespace) {
            Some(index) => index,
            None => {
                namespaces.push((namespace.to_string(), Vec::new()));
                namespaces.len() - 1
            }
        };
        let entries = &mut namespaces[index].1;
        match entries.iter_mut().find(|(key, _)| key == request) {
            Some(entry) => entry.1 = response.clone(),
            None => entries.push((request.clone(), response.clone())),
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, AssetError> {
        Ok(self.lock()?.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn delete(&self, namespace: &str) -> Result<bool, AssetError> {
        let mut namespaces = self.lock()?;
        let before = namespaces.len();
        namespaces.retain(|(name, _)| name != namespace);
        Ok(namespaces.len() != before)
    }

    async fn requests(&self, namespace: &str) -> Result<Vec<AssetRequest>, AssetError> {
        let namespaces = self.lock()?;
        Ok(namespaces
            .iter()
            .find(|(name, _)| name == namespace)
            .map(|(_, entries)| entries.iter().map(|(key, _)| key.clone()).collect())
            .unwrap_or_default())
    }

    fn storage_type(&self) -> &str {
        "memory"
    }
}
