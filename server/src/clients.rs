//! Connected host pages and status broadcast

use crate::cache::AssetError;
use hcsim_proto::ServerMessage;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outgoing queue depth per host page
pub const CLIENT_QUEUE_CAPACITY: usize = 32;

pub type ClientId = Uuid;

struct ClientHandle {
    sender: mpsc::Sender<ServerMessage>,
    controlled: bool,
}

/// Why a broadcast did not reach a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The page's outgoing queue is full
    QueueFull,
    /// The page went away; it has been dropped from the registry
    Disconnected,
}

/// Outcome of one broadcast
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<(ClientId, DeliveryFailure)>,
}

/// Registry of host pages currently connected to the agent
///
/// Only controlled pages receive broadcasts. Pages that connect while the
/// agent is active are controlled from the start; earlier ones are picked
/// up by `claim`.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ClientId, ClientHandle>>, AssetError> {
        self.clients
            .lock()
            .map_err(|_| AssetError::LockPoisoned("client registry"))
    }

    /// Register a page and hand back the receiving end of its queue
    pub fn connect(
        &self,
        controlled: bool,
    ) -> Result<(ClientId, mpsc::Receiver<ServerMessage>), AssetError> {
        let (sender, receiver) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let id = Uuid::new_v4();
        self.lock()?.insert(id, ClientHandle { sender, controlled });
        debug!("Host page {} connected (controlled: {})", id, controlled);
        Ok((id, receiver))
    }

    pub fn disconnect(&self, id: &ClientId) -> Result<(), AssetError> {
        if self.lock()?.remove(id).is_some() {
            debug!("Host page {} disconnected", id);
        }
        Ok(())
    }

    /// Take control of every connected page; returns how many were newly claimed
    pub fn claim(&self) -> Result<usize, AssetError> {
        let mut clients = self.lock()?;
        let mut claimed = 0;
        for handle in clients.values_mut().filter(|handle| !handle.controlled) {
            handle.controlled = true;
            claimed += 1;
        }
        Ok(claimed)
    }

    /// Number of pages that would receive a broadcast
    pub fn controlled_count(&self) -> Result<usize, AssetError> {
        Ok(self.lock()?.values().filter(|handle| handle.controlled).count())
    }

    /// Deliver `message` to every controlled page without waiting on any of them
    pub fn broadcast(&self, message: &ServerMessage) -> Result<BroadcastReport, AssetError> {
        let mut clients = self.lock()?;
        let mut report = BroadcastReport::default();

        for (id, handle) in clients.iter().filter(|(_, handle)| handle.controlled) {
            match handle.sender.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Host page {} is not keeping up, dropped a message", id);
                    report.failed.push((*id, DeliveryFailure::QueueFull));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    report.failed.push((*id, DeliveryFailure::Disconnected));
                }
            }
        }

        for (id, failure) in &report.failed {
            if *failure == DeliveryFailure::Disconnected {
                clients.remove(id);
            }
        }

        debug!(
            "Broadcast delivered to {} page(s), {} failure(s)",
            report.delivered,
            report.failed.len()
        );
        Ok(report)
    }
}
