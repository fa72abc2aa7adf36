//! Directed publish/subscribe
//!
//! A [`Publisher`] binds and accepts subscribers; a [`Subscriber`] dials one
//! publisher. Subscribers announce topics by sending the frame prefix they
//! want (`topic:<name>|`), and the publisher only writes frames that start
//! with one of a connection's prefixes. Topics match exactly.

use crate::backoff::sleep_or_shutdown;
use crate::error::{BusError, Result};
use crate::fanout::{metric_topic, TopicPublisher};
use crate::outbound::{Enqueued, Outbound};
use crate::transport::{self, Endpoint, FrameReader, Listener};
use crate::wire::{subscription_prefix, validate_topic, WireMessage};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const ACCEPT_RETRY: Duration = Duration::from_millis(50);
/// Frames queued per subscriber before new ones are dropped for it
const SUBSCRIBER_QUEUE: usize = 256;

struct SubscriberSlot {
    label: String,
    outbound: Outbound,
    prefixes: HashSet<Bytes>,
}

#[derive(Default)]
struct SubscriberTable {
    next_id: AtomicU64,
    slots: RwLock<HashMap<u64, SubscriberSlot>>,
}

impl SubscriberTable {
    fn insert(&self, label: String, outbound: Outbound) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.write().insert(
            id,
            SubscriberSlot {
                label,
                outbound,
                prefixes: HashSet::new(),
            },
        );
        id
    }

    fn subscribe(&self, id: u64, prefix: Bytes) {
        if let Some(slot) = self.slots.write().get_mut(&id) {
            debug!(subscriber = %slot.label, prefix = %String::from_utf8_lossy(&prefix), "Subscription added");
            slot.prefixes.insert(prefix);
        }
    }

    fn remove(&self, id: u64) {
        if let Some(slot) = self.slots.write().remove(&id) {
            info!(subscriber = %slot.label, "Subscriber disconnected");
        }
    }

    /// Queues of the subscribers whose subscriptions match `frame`
    fn interested(&self, frame: &[u8]) -> Vec<(u64, Outbound)> {
        self.slots
            .read()
            .iter()
            .filter(|(_, slot)| slot.prefixes.iter().any(|p| frame.starts_with(p)))
            .map(|(id, slot)| (*id, slot.outbound.clone()))
            .collect()
    }
}

/// Bound side of a directed pub/sub channel
pub struct Publisher {
    local: Endpoint,
    subscribers: Arc<SubscriberTable>,
    shutdown_tx: watch::Sender<bool>,
}

impl Publisher {
    pub async fn bind(url: &str, max_frame_size: usize) -> Result<Self> {
        let listener = Listener::bind(&Endpoint::parse(url)?).await?;
        let local = listener.local_endpoint()?;
        let subscribers = Arc::new(SubscriberTable::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(accept_subscribers(
            listener,
            subscribers.clone(),
            shutdown_rx,
            max_frame_size,
        ));

        info!(url, local = %local, "Publisher bound");
        Ok(Self {
            local,
            subscribers,
            shutdown_tx,
        })
    }

    pub async fn publish(&self, topic: &str, content: &str) -> Result<usize> {
        self.send(&WireMessage::plain(topic, content)).await
    }

    pub async fn publish_json<T: Serialize + ?Sized>(&self, topic: &str, value: &T) -> Result<usize> {
        self.send(&WireMessage::json(topic, value)?).await
    }

    /// Queue the frame for every subscriber of its topic. Having no
    /// subscriber is not an error; no interested subscriber taking it is.
    /// A subscriber that stopped reading misses frames once its queue fills.
    pub async fn send(&self, message: &WireMessage) -> Result<usize> {
        let frame = message.encode()?;
        let mut delivered = 0;
        let mut missed = 0;

        for (id, outbound) in self.subscribers.interested(&frame) {
            match outbound.enqueue(frame.clone()) {
                Enqueued::Queued => delivered += 1,
                Enqueued::Dropped => {
                    debug!(subscriber = id, topic = %message.topic, "Subscriber queue full, frame dropped");
                    missed += 1;
                }
                Enqueued::Closed => {
                    warn!(subscriber = id, "Subscriber writer closed");
                    self.subscribers.remove(id);
                    missed += 1;
                }
            }
        }

        if delivered == 0 && missed > 0 {
            return Err(BusError::PublishFailed { peers: missed });
        }
        Ok(delivered)
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.slots.read().len()
    }

    /// Total topic subscriptions across all subscribers
    pub fn subscription_count(&self) -> usize {
        self.subscribers
            .slots
            .read()
            .values()
            .map(|slot| slot.prefixes.len())
            .sum()
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

#[async_trait]
impl TopicPublisher for Publisher {
    async fn publish_message(&self, message: WireMessage) -> Result<usize> {
        self.send(&message).await
    }
}

async fn accept_subscribers(
    listener: Listener,
    subscribers: Arc<SubscriberTable>,
    mut shutdown: watch::Receiver<bool>,
    max_frame_size: usize,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((reader, writer, label)) => {
                info!(subscriber = %label, "Subscriber connected");
                let (outbound, _) =
                    Outbound::spawn(writer, SUBSCRIBER_QUEUE, label.clone(), shutdown.clone());
                let id = subscribers.insert(label, outbound);
                tokio::spawn(read_subscriptions(
                    id,
                    reader,
                    subscribers.clone(),
                    shutdown.clone(),
                    max_frame_size,
                ));
            }
            Err(e) => {
                warn!(error = %e, "Publisher accept failed");
                if sleep_or_shutdown(ACCEPT_RETRY, &mut shutdown).await {
                    break;
                }
            }
        }
    }
}

/// Every frame a subscriber sends is a subscription prefix
async fn read_subscriptions(
    id: u64,
    mut reader: FrameReader,
    subscribers: Arc<SubscriberTable>,
    mut shutdown: watch::Receiver<bool>,
    max_frame_size: usize,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            frame = transport::read_frame(&mut reader, max_frame_size) => frame,
        };

        match frame {
            Ok(Some(prefix)) => subscribers.subscribe(id, prefix),
            Ok(None) => break,
            Err(e) => {
                warn!(subscriber = id, error = %e, "Bad subscription frame");
                break;
            }
        }
    }

    subscribers.remove(id);
}

/// Dialing side of a directed pub/sub channel
pub struct Subscriber {
    url: String,
    reader: FrameReader,
    writer: transport::FrameWriter,
    topics: Vec<String>,
    max_frame_size: usize,
}

impl Subscriber {
    pub async fn dial(url: &str, max_frame_size: usize) -> Result<Self> {
        let (reader, writer) = transport::connect(&Endpoint::parse(url)?).await?;
        debug!(url, "Subscriber connected");

        Ok(Self {
            url: url.to_string(),
            reader,
            writer,
            topics: Vec::new(),
            max_frame_size,
        })
    }

    pub async fn subscribe(&mut self, topic: &str) -> Result<()> {
        validate_topic(topic)?;
        transport::write_frame(&mut self.writer, subscription_prefix(topic).as_bytes()).await?;
        self.topics.push(topic.to_string());
        Ok(())
    }

    /// Subscribe to `metric-<key>`
    pub async fn subscribe_metric(&mut self, metric_key: &str) -> Result<()> {
        self.subscribe(&metric_topic(metric_key)).await
    }

    /// Next message, `None` when the publisher goes away
    pub async fn recv(&mut self) -> Result<Option<WireMessage>> {
        match transport::read_frame(&mut self.reader, self.max_frame_size).await? {
            Some(frame) => WireMessage::decode(&frame).map(Some),
            None => Ok(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}

/// Whether `url` points at this machine
pub fn is_self_url(url: &str, hostname: &str) -> bool {
    let host = match Endpoint::parse(url) {
        Ok(Endpoint::Tcp(addr)) => addr,
        Ok(Endpoint::Ipc(_)) => return true,
        Err(_) => return false,
    };
    let host = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host.as_str());
    let host = host.trim_start_matches('[').trim_end_matches(']');

    matches!(host, "localhost" | "127.0.0.1" | "::1" | "0.0.0.0") || host == hostname
}

/// Named publishers bound by this node plus the subscriber URLs it may dial
pub struct PubSubs {
    publishers: BTreeMap<String, Publisher>,
    subscriber_urls: Vec<(String, String)>,
    max_frame_size: usize,
}

impl PubSubs {
    /// Bind every publisher URL; subscriber URLs are dialed on demand
    pub async fn start(
        publishers: &[(String, String)],
        subscribers: &[(String, String)],
        max_frame_size: usize,
    ) -> Result<Self> {
        let mut bound = BTreeMap::new();
        for (name, url) in publishers {
            bound.insert(name.clone(), Publisher::bind(url, max_frame_size).await?);
        }

        Ok(Self {
            publishers: bound,
            subscriber_urls: subscribers.to_vec(),
            max_frame_size,
        })
    }

    pub fn publisher(&self, name: &str) -> Option<&Publisher> {
        self.publishers.get(name)
    }

    pub fn publishers(&self) -> impl Iterator<Item = (&str, &Publisher)> {
        self.publishers.iter().map(|(name, p)| (name.as_str(), p))
    }

    /// First subscriber URL that points at this machine
    pub fn self_subscriber_url(&self, hostname: &str) -> Option<&str> {
        self.subscriber_urls
            .iter()
            .map(|(_, url)| url.as_str())
            .find(|url| is_self_url(url, hostname))
    }

    pub async fn dial_self_subscriber(&self, hostname: &str) -> Result<Subscriber> {
        let url = self
            .self_subscriber_url(hostname)
            .ok_or_else(|| BusError::NoSelfSubscriber {
                hostname: hostname.to_string(),
            })?;
        Subscriber::dial(url, self.max_frame_size).await
    }
}

#[async_trait]
impl TopicPublisher for PubSubs {
    /// Send on every bound publisher; returns total deliveries. One failing
    /// publisher does not stop the others.
    async fn publish_message(&self, message: WireMessage) -> Result<usize> {
        let mut delivered = 0;
        let mut last_error = None;

        for (name, publisher) in &self.publishers {
            match publisher.send(&message).await {
                Ok(count) => delivered += count,
                Err(e) => {
                    warn!(publisher = %name, topic = %message.topic, error = %e, "Pubsub publish failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(delivered),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_self_url() {
        assert!(is_self_url("tcp://localhost:55655", "web-01"));
        assert!(is_self_url("tcp://127.0.0.1:55655", "web-01"));
        assert!(is_self_url("tcp://web-01:55655", "web-01"));
        assert!(is_self_url("ipc:///tmp/resourced.sock", "web-01"));
        assert!(!is_self_url("tcp://db-02:55655", "web-01"));
        assert!(!is_self_url("garbage", "web-01"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let publisher = Publisher::bind("tcp://127.0.0.1:0", 1024).await.unwrap();
        assert_eq!(publisher.publish("metric-/uptime", "1").await.unwrap(), 0);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_invalid_topic() {
        let publisher = Publisher::bind("tcp://127.0.0.1:0", 1024).await.unwrap();
        let url = publisher.local_endpoint().to_string();

        let mut subscriber = Subscriber::dial(&url, 1024).await.unwrap();
        assert!(subscriber.subscribe("a|b").await.is_err());
        assert!(subscriber.topics().is_empty());
    }

    #[tokio::test]
    async fn test_pubsubs_publish_on_every_publisher() {
        let pubsubs = PubSubs::start(
            &[
                ("a".to_string(), "tcp://127.0.0.1:0".to_string()),
                ("b".to_string(), "tcp://127.0.0.1:0".to_string()),
            ],
            &[],
            1024,
        )
        .await
        .unwrap();

        let mut subscribers = Vec::new();
        for name in ["a", "b"] {
            let url = pubsubs.publisher(name).unwrap().local_endpoint().to_string();
            let mut subscriber = Subscriber::dial(&url, 1024).await.unwrap();
            subscriber.subscribe("checks-refetch").await.unwrap();
            subscribers.push(subscriber);
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while pubsubs.publishers().any(|(_, p)| p.subscription_count() == 0) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let delivered = pubsubs
            .publish_message(WireMessage::plain("checks-refetch", "now"))
            .await
            .unwrap();
        assert_eq!(delivered, 2);

        for subscriber in &mut subscribers {
            let message = subscriber.recv().await.unwrap().unwrap();
            assert_eq!(message.plain_content(), "now");
        }
    }

    #[tokio::test]
    async fn test_no_self_subscriber() {
        let pubsubs = PubSubs::start(
            &[],
            &[("remote".to_string(), "tcp://db-02:55655".to_string())],
            1024,
        )
        .await
        .unwrap();

        assert!(pubsubs.self_subscriber_url("web-01").is_none());
        assert!(matches!(
            pubsubs.dial_self_subscriber("web-01").await,
            Err(BusError::NoSelfSubscriber { .. })
        ));
    }
}
