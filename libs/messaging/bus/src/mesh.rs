//! Full-mesh message bus
//!
//! Every node listens on its own address and dials its peers. A frame
//! published on one node is written to every connection that node holds, and
//! frames arriving on any connection feed a single receive loop. Nodes do not
//! forward what they receive.
//!
//! There is no deduplication: when two nodes dial each other they share two
//! connections and see each other's frames twice. Handlers must be idempotent.

use crate::backoff::{sleep_or_shutdown, Backoff};
use crate::error::{BusError, Result};
use crate::fanout::TopicPublisher;
use crate::handler::HandlerSet;
use crate::registry::ClientRegistry;
use crate::outbound::{Enqueued, Outbound};
use crate::transport::{self, Endpoint, FrameReader, FrameWriter, Listener};
use crate::wire::WireMessage;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Frames buffered between peer readers and the receive loop
const INBOUND_QUEUE: usize = 4096;

#[derive(Debug, Clone)]
pub struct BusOptions {
    pub max_frame_size: usize,
    /// First delay after a receive, accept or dial error
    pub backoff: Duration,
    pub backoff_max: Duration,
    /// Frames queued per peer before new ones are dropped for that peer
    pub send_queue: usize,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024, // 16MB
            backoff: Duration::from_millis(50),
            backoff_max: Duration::from_secs(5),
            send_queue: 1024,
        }
    }
}

impl BusOptions {
    pub(crate) fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff, self.backoff_max)
    }
}

#[derive(Default)]
struct PeerTable {
    next_id: AtomicU64,
    outbound: Mutex<HashMap<u64, Outbound>>,
}

impl PeerTable {
    fn insert(&self, outbound: Outbound) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.outbound.lock().insert(id, outbound);
        id
    }

    fn remove(&self, id: u64) -> bool {
        self.outbound.lock().remove(&id).is_some()
    }

    fn snapshot(&self) -> Vec<(u64, Outbound)> {
        self.outbound
            .lock()
            .iter()
            .map(|(id, outbound)| (*id, outbound.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.outbound.lock().len()
    }
}

/// State shared by the accept loop, dialers and peer readers
#[derive(Clone)]
struct Wiring {
    peers: Arc<PeerTable>,
    inbound: mpsc::Sender<Result<Bytes>>,
    shutdown: watch::Receiver<bool>,
    options: BusOptions,
}

impl Wiring {
    /// Register a connection and start reading from it. The returned task
    /// finishes when the connection is gone.
    fn attach(&self, reader: FrameReader, writer: FrameWriter, label: String) -> JoinHandle<()> {
        let (outbound, _) = Outbound::spawn(
            writer,
            self.options.send_queue,
            label.clone(),
            self.shutdown.clone(),
        );
        let id = self.peers.insert(outbound);
        info!(peer = %label, peers = self.peers.len(), "Bus peer connected");

        let wiring = self.clone();
        tokio::spawn(wiring.read_peer(id, reader, label))
    }

    async fn read_peer(mut self, id: u64, mut reader: FrameReader, label: String) {
        loop {
            let frame = tokio::select! {
                _ = self.shutdown.changed() => break,
                frame = transport::read_frame(&mut reader, self.options.max_frame_size) => frame,
            };

            match frame {
                Ok(Some(frame)) => {
                    if self.inbound.send(Ok(frame)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    info!(peer = %label, "Bus peer disconnected");
                    break;
                }
                Err(e) => {
                    let _ = self.inbound.send(Err(e)).await;
                    break;
                }
            }
        }

        self.peers.remove(id);
    }
}

pub struct MessageBus {
    url: String,
    local: Endpoint,
    wiring: Wiring,
    inbound_rx: Mutex<Option<mpsc::Receiver<Result<Bytes>>>>,
    registry: ClientRegistry,
    shutdown_tx: watch::Sender<bool>,
}

impl MessageBus {
    /// Bind `url` and start accepting peers and serving the client registry
    pub async fn listen(url: &str, options: BusOptions) -> Result<Self> {
        let listener = Listener::bind(&Endpoint::parse(url)?).await?;
        let local = listener.local_endpoint()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let wiring = Wiring {
            peers: Arc::new(PeerTable::default()),
            inbound: inbound_tx,
            shutdown: shutdown_rx.clone(),
            options,
        };

        let (registry, coordinator) = ClientRegistry::new();
        tokio::spawn(coordinator.run(shutdown_rx));
        tokio::spawn(accept_loop(listener, wiring.clone()));

        info!(url, local = %local, "Message bus listening");

        Ok(Self {
            url: url.to_string(),
            local,
            wiring,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            registry,
            shutdown_tx,
        })
    }

    /// Keep a connection to `url` open, redialing with backoff when it drops
    pub fn dial(&self, url: &str) -> Result<()> {
        let endpoint = Endpoint::parse(url)?;
        tokio::spawn(dial_loop(endpoint, self.wiring.clone()));
        Ok(())
    }

    /// Dial every peer except this node's own address
    pub fn dial_others(&self, urls: &[String]) -> Result<()> {
        for url in urls {
            if *url == self.url {
                debug!(url = %url, "Skipping own address");
                continue;
            }
            self.dial(url)?;
        }
        Ok(())
    }

    pub async fn publish(&self, topic: &str, content: &str) -> Result<usize> {
        self.send(&WireMessage::plain(topic, content)).await
    }

    pub async fn publish_json<T: Serialize + ?Sized>(&self, topic: &str, value: &T) -> Result<usize> {
        self.send(&WireMessage::json(topic, value)?).await
    }

    /// Queue the frame on every connected peer without waiting for sockets.
    /// A peer whose queue is full misses this frame; a peer whose writer has
    /// stopped is dropped. Fails only when no peer took the frame.
    async fn send(&self, message: &WireMessage) -> Result<usize> {
        let frame = message.encode()?;
        let peers = self.wiring.peers.snapshot();

        if peers.is_empty() {
            debug!(topic = %message.topic, "No bus peers connected");
            return Ok(0);
        }

        let mut delivered = 0;
        let mut missed = 0;
        for (id, outbound) in peers {
            match outbound.enqueue(frame.clone()) {
                Enqueued::Queued => delivered += 1,
                Enqueued::Dropped => {
                    debug!(peer = id, topic = %message.topic, "Peer send queue full, frame dropped");
                    missed += 1;
                }
                Enqueued::Closed => {
                    warn!(peer = id, "Bus peer writer closed, dropping peer");
                    self.wiring.peers.remove(id);
                    missed += 1;
                }
            }
        }

        if delivered == 0 {
            return Err(BusError::PublishFailed { peers: missed });
        }
        Ok(delivered)
    }

    /// Receive loop: dispatch each frame to every handler whose prefix
    /// matches its topic, each on its own task. Runs until `shutdown` flips.
    pub async fn run(&self, handlers: HandlerSet, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut inbound = self.inbound_rx.lock().take().ok_or(BusError::AlreadyRunning)?;
        let mut backoff = self.wiring.options.backoff();

        info!(handlers = ?handlers, "Bus receive loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let item = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                item = inbound.recv() => item,
            };

            let frame = match item {
                None => break,
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, ?delay, "Error when receiving message from bus");
                    if sleep_or_shutdown(delay, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            backoff.reset();
            match WireMessage::decode(&frame) {
                Ok(message) => dispatch(&handlers, message),
                Err(e) => warn!(error = %e, bytes = frame.len(), "Dropping undecodable bus frame"),
            }
        }

        info!("Bus receive loop stopped");
        Ok(())
    }

    /// Stop accepting, dialing and reading; closes every registered client
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Receiver that flips to `true` on [`MessageBus::shutdown`]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Bound address, with the actual port when listening on `:0`
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    pub fn peer_count(&self) -> usize {
        self.wiring.peers.len()
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

#[async_trait]
impl TopicPublisher for MessageBus {
    async fn publish_message(&self, message: WireMessage) -> Result<usize> {
        self.send(&message).await
    }
}

fn dispatch(handlers: &HandlerSet, message: WireMessage) {
    let mut matched = 0;
    for handler in handlers.matching(&message.topic) {
        let handler = handler.clone();
        let message = message.clone();
        tokio::spawn(async move { handler.handle(message).await });
        matched += 1;
    }

    if matched == 0 {
        debug!(topic = %message.topic, "No handler for topic");
    }
}

async fn accept_loop(listener: Listener, wiring: Wiring) {
    let mut shutdown = wiring.shutdown.clone();
    let mut backoff = wiring.options.backoff();

    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((reader, writer, peer)) => {
                backoff.reset();
                wiring.attach(reader, writer, peer);
            }
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(error = %e, ?delay, "Bus accept failed");
                if sleep_or_shutdown(delay, &mut shutdown).await {
                    break;
                }
            }
        }
    }

    debug!("Bus accept loop stopped");
}

async fn dial_loop(endpoint: Endpoint, wiring: Wiring) {
    let mut shutdown = wiring.shutdown.clone();
    let mut backoff = wiring.options.backoff();

    loop {
        let connected = tokio::select! {
            _ = shutdown.changed() => break,
            connected = transport::connect(&endpoint) => connected,
        };

        match connected {
            Ok((reader, writer)) => {
                backoff.reset();
                let connection = wiring.attach(reader, writer, endpoint.to_string());
                tokio::select! {
                    _ = connection => {}
                    _ = shutdown.changed() => break,
                }
                warn!(peer = %endpoint, "Bus peer connection lost, redialing");
            }
            Err(e) => warn!(peer = %endpoint, error = %e, "Bus peer unreachable"),
        }

        if sleep_or_shutdown(backoff.next_delay(), &mut shutdown).await {
            break;
        }
    }

    debug!(peer = %endpoint, "Bus dialer stopped");
}
