//! Tracking which bundles are fully present in the cache

use crate::bundles::BundleRegistry;
use crate::cache::{AssetError, CacheStore};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Ordered, duplicate-free set of bundle names confirmed fully cached
///
/// Membership is a point-in-time assertion made at the last check; the
/// store may evict entries behind its back.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    completed: Mutex<Vec<String>>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<String>>, AssetError> {
        self.completed
            .lock()
            .map_err(|_| AssetError::LockPoisoned("completion tracker"))
    }

    pub fn snapshot(&self) -> Result<Vec<String>, AssetError> {
        Ok(self.lock()?.clone())
    }

    pub fn contains(&self, name: &str) -> Result<bool, AssetError> {
        Ok(self.lock()?.iter().any(|completed| completed == name))
    }

    pub fn mark(&self, name: &str) -> Result<(), AssetError> {
        let mut completed = self.lock()?;
        if !completed.iter().any(|existing| existing == name) {
            completed.push(name.to_string());
        }
        Ok(())
    }

    pub fn mark_all<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<(), AssetError> {
        for name in names {
            self.mark(name)?;
        }
        Ok(())
    }

    pub fn reset(&self) -> Result<(), AssetError> {
        self.lock()?.clear();
        Ok(())
    }

    /// Probe the store for every bundle not yet marked complete.
    ///
    /// A bundle is marked once every asset in its resolved list is found,
    /// and only if there was at least one asset to find. Probing stops at
    /// the first missing asset. Already-complete bundles are not re-checked.
    pub async fn recompute(
        &self,
        registry: &BundleRegistry,
        store: &CacheStore,
    ) -> Result<Vec<String>, AssetError> {
        for name in registry.names() {
            if self.contains(name)? {
                continue;
            }

            let assets = match registry.resolve(name) {
                Ok(assets) => assets,
                Err(e) => {
                    warn!("Skipping bundle {} during check: {}", name, e);
                    continue;
                }
            };

            let mut completed = false;
            for asset in &assets {
                if store.lookup(asset).await?.is_none() {
                    debug!("Bundle {} incomplete, missing {}", name, asset);
                    completed = false;
                    break;
                }
                completed = true;
            }

            if completed {
                info!("Bundle {} is fully cached", name);
                self.mark(name)?;
            }
        }

        self.snapshot()
    }
}
