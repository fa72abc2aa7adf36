//! Locally attached stream consumers
//!
//! A single coordinator task owns the client map. Registration and
//! deregistration reach it through two dedicated request channels, broadcasts
//! through a third; nothing else touches the map, so it needs no lock.
//! Dropping a client's sender (on deregistration or shutdown) is what ends
//! the consumer's stream.

use crate::error::{BusError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub type ClientId = u64;

/// Messages buffered per client before new ones are dropped for it
const CLIENT_BUFFER: usize = 256;

/// Cloneable handle used to register clients and broadcast to them
#[derive(Clone, Debug)]
pub struct ClientRegistry {
    register_tx: mpsc::UnboundedSender<(ClientId, mpsc::Sender<String>)>,
    deregister_tx: mpsc::UnboundedSender<ClientId>,
    broadcast_tx: mpsc::UnboundedSender<String>,
    next_id: Arc<AtomicU64>,
    active: Arc<AtomicUsize>,
}

/// Receiving end held by one consumer; deregisters itself when dropped
#[derive(Debug)]
pub struct ClientStream {
    id: ClientId,
    receiver: mpsc::Receiver<String>,
    deregister_tx: mpsc::UnboundedSender<ClientId>,
}

impl ClientStream {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Next broadcast, `None` once deregistered or shut down
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        let _ = self.deregister_tx.send(self.id);
    }
}

/// The task that owns the client map
pub struct RegistryCoordinator {
    register_rx: mpsc::UnboundedReceiver<(ClientId, mpsc::Sender<String>)>,
    deregister_rx: mpsc::UnboundedReceiver<ClientId>,
    broadcast_rx: mpsc::UnboundedReceiver<String>,
    active: Arc<AtomicUsize>,
}

impl ClientRegistry {
    pub fn new() -> (Self, RegistryCoordinator) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (deregister_tx, deregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicUsize::new(0));

        let registry = Self {
            register_tx,
            deregister_tx,
            broadcast_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            active: active.clone(),
        };
        let coordinator = RegistryCoordinator {
            register_rx,
            deregister_rx,
            broadcast_rx,
            active,
        };
        (registry, coordinator)
    }

    pub fn register(&self) -> Result<ClientStream> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);

        self.register_tx
            .send((id, tx))
            .map_err(|_| BusError::RegistryClosed)?;

        Ok(ClientStream {
            id,
            receiver: rx,
            deregister_tx: self.deregister_tx.clone(),
        })
    }

    pub fn deregister(&self, id: ClientId) {
        let _ = self.deregister_tx.send(id);
    }

    /// Queue `content` for every registered client
    pub fn broadcast(&self, content: impl Into<String>) {
        if self.broadcast_tx.send(content.into()).is_err() {
            debug!("Registry stopped, broadcast dropped");
        }
    }

    /// Clients known to the coordinator as of its last processed request
    pub fn client_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

impl RegistryCoordinator {
    /// Serve requests until shutdown or until every registry handle is gone.
    /// All client channels are closed on exit.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut clients: HashMap<ClientId, mpsc::Sender<String>> = HashMap::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                request = self.register_rx.recv() => match request {
                    Some((id, tx)) => {
                        clients.insert(id, tx);
                        debug!(client = id, total = clients.len(), "Client registered");
                    }
                    None => break,
                },

                Some(id) = self.deregister_rx.recv() => {
                    // Dropping the sender closes the client's stream
                    if clients.remove(&id).is_some() {
                        debug!(client = id, total = clients.len(), "Client deregistered");
                    }
                }

                Some(content) = self.broadcast_rx.recv() => {
                    clients.retain(|id, tx| match tx.try_send(content.clone()) {
                        Ok(()) => true,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            debug!(client = id, "Client lagging, message dropped");
                            true
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => false,
                    });
                }
            }

            self.active.store(clients.len(), Ordering::Relaxed);
        }

        info!(clients = clients.len(), "Client registry stopped");
        clients.clear();
        self.active.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn start() -> (ClientRegistry, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (registry, coordinator) = ClientRegistry::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(coordinator.run(shutdown_rx));
        (registry, shutdown_tx, handle)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_registered_clients() {
        let (registry, _shutdown, _) = start();
        let mut a = registry.register().unwrap();
        let mut b = registry.register().unwrap();
        assert_ne!(a.id(), b.id());

        registry.broadcast(r#"{"MetricID":7}"#);

        assert_eq!(a.recv().await.unwrap(), r#"{"MetricID":7}"#);
        assert_eq!(b.recv().await.unwrap(), r#"{"MetricID":7}"#);
    }

    #[tokio::test]
    async fn test_deregister_closes_stream() {
        let (registry, _shutdown, _) = start();
        let mut client = registry.register().unwrap();

        registry.deregister(client.id());
        registry.broadcast("after");

        let next = timeout(Duration::from_secs(1), client.recv()).await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_dropped_stream_is_removed() {
        let (registry, _shutdown, _) = start();
        let client = registry.register().unwrap();
        let mut other = registry.register().unwrap();
        drop(client);

        registry.broadcast("x");
        assert_eq!(other.recv().await.unwrap(), "x");
        assert_eq!(registry.client_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_client() {
        let (registry, shutdown, handle) = start();
        let mut a = registry.register().unwrap();
        let mut b = registry.register().unwrap();

        shutdown.send(true).unwrap();
        handle.await.unwrap();

        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
        assert!(matches!(registry.register(), Err(BusError::RegistryClosed)));
    }
}
