//! Lifecycle controller and host page command dispatcher

use crate::bundles::BundleRegistry;
use crate::cache::fetcher::{fetch_or_cache, Fetcher};
use crate::cache::{AssetError, AssetRequest, AssetResponse, CacheStore};
use crate::clients::{BroadcastReport, ClientId, ClientRegistry};
use crate::completeness::CompletionTracker;
use hcsim_proto::{ClientMessage, DownloadTarget, ServerMessage};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Cannot {event} while {from:?}")]
    InvalidTransition { from: Lifecycle, event: &'static str },

    #[error(transparent)]
    Asset(#[from] AssetError),
}

/// Where the agent is in its platform lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Installing,
    Waiting,
    Active,
}

/// Everything the platform can deliver to the agent
#[derive(Debug, Clone)]
pub enum Event {
    Install,
    Activate,
    Fetch(AssetRequest),
    Message(ClientMessage),
}

#[derive(Debug)]
pub enum Outcome {
    /// Installed and asking to replace any waiting instance right away
    Installed { skip_waiting: bool },
    Activated { removed_namespaces: Vec<String>, claimed: usize },
    Response(AssetResponse),
    Handled,
}

/// The caching agent
///
/// Owns the completed-bundle set and serializes host page commands so a
/// `clear` never interleaves with a `download` or `check`. Intercepted
/// fetches are not serialized.
pub struct Worker {
    store: CacheStore,
    fetcher: Arc<dyn Fetcher>,
    registry: BundleRegistry,
    clients: ClientRegistry,
    tracker: CompletionTracker,
    lifecycle: Mutex<Lifecycle>,
    commands: tokio::sync::Mutex<()>,
}

impl Worker {
    pub fn new(store: CacheStore, fetcher: Arc<dyn Fetcher>, registry: BundleRegistry) -> Self {
        Self {
            store,
            fetcher,
            registry,
            clients: ClientRegistry::new(),
            tracker: CompletionTracker::new(),
            lifecycle: Mutex::new(Lifecycle::Installing),
            commands: tokio::sync::Mutex::new(()),
        }
    }

    pub fn version(&self) -> &str {
        self.store.version()
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn lifecycle(&self) -> Result<Lifecycle, AssetError> {
        self.lifecycle
            .lock()
            .map(|state| *state)
            .map_err(|_| AssetError::LockPoisoned("worker lifecycle"))
    }

    fn transition(
        &self,
        expected: Lifecycle,
        next: Lifecycle,
        event: &'static str,
    ) -> Result<(), WorkerError> {
        let mut state = self
            .lifecycle
            .lock()
            .map_err(|_| AssetError::LockPoisoned("worker lifecycle"))?;
        if *state != expected {
            return Err(WorkerError::InvalidTransition { from: *state, event });
        }
        *state = next;
        Ok(())
    }

    /// Completed bundle names as of the last check
    pub fn cached_bundles(&self) -> Result<Vec<String>, AssetError> {
        self.tracker.snapshot()
    }

    /// Register a host page; pages connecting to an active agent are controlled
    pub fn connect_client(&self) -> Result<(ClientId, mpsc::Receiver<ServerMessage>), AssetError> {
        let state = self
            .lifecycle
            .lock()
            .map_err(|_| AssetError::LockPoisoned("worker lifecycle"))?;
        // activate claims only after the transition, so holding the state here closes the gap
        self.clients.connect(*state == Lifecycle::Active)
    }

    pub async fn dispatch(&self, event: Event) -> Result<Outcome, WorkerError> {
        match event {
            Event::Install => self.install(),
            Event::Activate => self.activate().await,
            Event::Fetch(request) => Ok(Outcome::Response(self.handle_fetch(&request).await?)),
            Event::Message(message) => {
                self.handle_message(message).await?;
                Ok(Outcome::Handled)
            }
        }
    }

    /// Installing -> Waiting, immediately asking to skip the wait
    pub fn install(&self) -> Result<Outcome, WorkerError> {
        info!("Install");
        self.transition(Lifecycle::Installing, Lifecycle::Waiting, "install")?;
        Ok(Outcome::Installed { skip_waiting: true })
    }

    /// Waiting -> Active: forget completed bundles, drop older cache
    /// generations and take control of every open page
    pub async fn activate(&self) -> Result<Outcome, WorkerError> {
        info!("Activate");
        self.transition(Lifecycle::Waiting, Lifecycle::Active, "activate")?;

        self.tracker.reset()?;
        let removed_namespaces = self.store.delete_stale_namespaces().await?;
        let claimed = self.clients.claim()?;

        info!(
            "Active on {} ({} stale namespace(s) removed, {} page(s) claimed)",
            self.store.namespace_name(),
            removed_namespaces.len(),
            claimed
        );
        Ok(Outcome::Activated {
            removed_namespaces,
            claimed,
        })
    }

    /// Answer an intercepted request, from cache when possible
    pub async fn handle_fetch(&self, request: &AssetRequest) -> Result<AssetResponse, AssetError> {
        fetch_or_cache(request, &self.store, self.fetcher.as_ref()).await
    }

    pub async fn handle_message(&self, message: ClientMessage) -> Result<(), WorkerError> {
        let _guard = self.commands.lock().await;
        match message {
            ClientMessage::Download(target) => self.download(target).await?,
            ClientMessage::Clear => self.clear().await?,
            ClientMessage::Check => {
                self.check().await?;
            }
        }
        Ok(())
    }

    fn broadcast_status(&self) -> Result<BroadcastReport, AssetError> {
        let message = ServerMessage::complete(self.tracker.snapshot()?, self.version());
        self.clients.broadcast(&message)
    }

    /// Recompute completeness and tell every page about it
    async fn check(&self) -> Result<Vec<String>, AssetError> {
        let completed = self.tracker.recompute(&self.registry, &self.store).await?;
        self.broadcast_status()?;
        Ok(completed)
    }

    async fn download(&self, target: DownloadTarget) -> Result<(), AssetError> {
        self.check().await?;

        if let DownloadTarget::One(name) = &target {
            if self.tracker.contains(name)? {
                debug!("Bundle {} already cached", name);
                return Ok(());
            }
        }

        let mut requested = Vec::new();
        let mut assets = Vec::new();
        for name in target.names() {
            if self.tracker.contains(name)? {
                continue;
            }
            match self.registry.resolve(name) {
                Ok(list) => {
                    requested.push(name);
                    assets.extend(list);
                }
                Err(e) => warn!("Not downloading {}: {}", name, e),
            }
        }

        info!("Downloading {} asset(s) for {:?}", assets.len(), requested);
        let mut succeeded = 0;
        for asset in &assets {
            match fetch_or_cache(asset, &self.store, self.fetcher.as_ref()).await {
                Ok(_) => succeeded += 1,
                Err(e) if e.is_fetch_failure() => warn!("Failed to download {}: {}", asset, e),
                Err(e) => return Err(e),
            }
        }

        if !assets.is_empty() && succeeded == assets.len() {
            self.tracker.mark_all(requested.iter().copied())?;
        } else if succeeded < assets.len() {
            warn!(
                "Downloaded {}/{} asset(s); {:?} left incomplete",
                succeeded,
                assets.len(),
                requested
            );
        }

        self.broadcast_status()?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), AssetError> {
        self.tracker.reset()?;
        let deleted = self.store.delete_all_namespaces().await?;
        info!("Cleared {} cache namespace(s)", deleted.len());
        self.clients.broadcast(&ServerMessage::Reload)?;
        Ok(())
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("store", &self.store)
            .field("fetcher", &"<dyn Fetcher>")
            .field("bundles", &self.registry.len())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}
