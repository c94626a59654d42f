use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, trace};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::types::BridgeEvent;

pub type ClientId = Uuid;

/// Sending half of a subscriber's outbound queue.
pub type Outbound = mpsc::UnboundedSender<String>;

/// The set of currently connected subscribers.
///
/// Cloning the registry is cheap and every clone refers to the same set.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<ClientId, Outbound>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection. Returns `false`, leaving the existing entry untouched, if
    /// `id` is already registered.
    pub async fn register(&self, id: ClientId, outbound: Outbound) -> bool {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&id) {
            debug!("Subscriber {} already registered", id);
            return false;
        }
        clients.insert(id, outbound);
        debug!("Subscriber {} registered ({} live)", id, clients.len());
        true
    }

    /// Removes a connection. Unknown ids are ignored.
    pub async fn unregister(&self, id: ClientId) -> bool {
        let mut clients = self.clients.write().await;
        let removed = clients.remove(&id).is_some();
        if removed {
            debug!("Subscriber {} unregistered ({} live)", id, clients.len());
        }
        removed
    }

    /// Queues `message` for every open connection and returns how many received it.
    ///
    /// Connections whose receiving side is already gone are skipped silently; they
    /// are removed when their socket task calls [`ClientRegistry::unregister`].
    pub async fn broadcast(&self, message: &str) -> usize {
        let clients = self.clients.read().await;
        let mut delivered = 0usize;
        for (id, outbound) in clients.iter() {
            if outbound.is_closed() {
                trace!("Skipping closed subscriber {}", id);
                continue;
            }
            if outbound.send(message.to_string()).is_ok() {
                delivered += 1;
            }
        }
        trace!("Broadcast to {}/{} subscriber(s)", delivered, clients.len());
        delivered
    }

    pub async fn broadcast_event(&self, event: &BridgeEvent) -> usize {
        match serde_json::to_string(event) {
            Ok(text) => self.broadcast(&text).await,
            Err(e) => {
                error!("Failed to serialize bridge event: {}", e);
                0
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}
