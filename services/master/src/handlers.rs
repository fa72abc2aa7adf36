//! Bus topic handlers for a master node

use crate::peers::PeerSet;
use message_bus::{
    ClientRegistry, HandlerSet, WireMessage, CHECKS_REFETCH_TOPIC, METRIC_TOPIC_PREFIX,
    PEERS_HEARTBEAT_TOPIC,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info};

/// Coalescing "reload check definitions" request. Any number of triggers
/// between two waits collapse into one wakeup.
#[derive(Debug, Default)]
pub struct RefetchSignal {
    notify: Notify,
    requests: AtomicU64,
}

impl RefetchSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    pub async fn wait(&self) {
        self.notify.notified().await
    }

    /// Triggers seen so far
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// State the handlers act on
#[derive(Clone)]
pub struct MasterHandlers {
    pub peers: Arc<PeerSet>,
    pub refetch: Arc<RefetchSignal>,
    pub registry: ClientRegistry,
}

impl MasterHandlers {
    pub fn handler_set(&self) -> HandlerSet {
        let heartbeat = self.clone();
        let refetch = self.refetch.clone();
        let registry = self.registry.clone();

        HandlerSet::new()
            .on(PEERS_HEARTBEAT_TOPIC, move |message: WireMessage| {
                let handlers = heartbeat.clone();
                async move { handlers.on_peers_heartbeat(&message) }
            })
            .on(CHECKS_REFETCH_TOPIC, move |_message: WireMessage| {
                let refetch = refetch.clone();
                async move { refetch.trigger() }
            })
            .on(METRIC_TOPIC_PREFIX, move |message: WireMessage| {
                let registry = registry.clone();
                async move { stream_metric(&registry, &message) }
            })
    }

    fn on_peers_heartbeat(&self, message: &WireMessage) {
        let addr = message.plain_content().trim();
        if addr.is_empty() {
            error!(topic = %message.topic, "Empty peers-heartbeat content");
            return;
        }

        if self.peers.touch(addr) {
            info!(peer = %addr, "Peer joined");
        }
        self.refetch.trigger();
    }
}

/// Forward a metric event's JSON body to every attached stream client
fn stream_metric(registry: &ClientRegistry, message: &WireMessage) {
    match message.json_content() {
        Ok(json) => {
            debug!(topic = %message.topic, clients = registry.client_count(), "Streaming metric");
            registry.broadcast(json);
        }
        Err(e) => error!(topic = %message.topic, error = %e, "Metric message is not JSON"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio::time::timeout;

    fn handlers() -> (MasterHandlers, watch::Sender<bool>) {
        let (registry, coordinator) = ClientRegistry::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(coordinator.run(shutdown_rx));

        let handlers = MasterHandlers {
            peers: Arc::new(PeerSet::new(Duration::from_secs(60))),
            refetch: Arc::new(RefetchSignal::new()),
            registry,
        };
        (handlers, shutdown_tx)
    }

    async fn deliver(set: &HandlerSet, message: WireMessage) {
        for handler in set.matching(&message.topic) {
            handler.handle(message.clone()).await;
        }
    }

    #[tokio::test]
    async fn test_heartbeat_records_peer_and_requests_refetch() {
        let (handlers, _shutdown) = handlers();
        let set = handlers.handler_set();

        deliver(&set, WireMessage::plain("peers-heartbeat", "master-2:55655")).await;

        assert!(handlers.peers.is_alive("master-2:55655"));
        assert_eq!(handlers.refetch.requests(), 1);
        timeout(Duration::from_secs(1), handlers.refetch.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_heartbeat_ignored() {
        let (handlers, _shutdown) = handlers();
        deliver(&handlers.handler_set(), WireMessage::plain("peers-heartbeat", "  ")).await;

        assert!(handlers.peers.is_empty());
        assert_eq!(handlers.refetch.requests(), 0);
    }

    #[tokio::test]
    async fn test_checks_refetch_triggers() {
        let (handlers, _shutdown) = handlers();
        deliver(&handlers.handler_set(), WireMessage::plain("checks-refetch", "")).await;
        assert_eq!(handlers.refetch.requests(), 1);
    }

    #[tokio::test]
    async fn test_metric_streamed_to_clients() {
        let (handlers, _shutdown) = handlers();
        let mut client = handlers.registry.register().unwrap();

        let message = WireMessage::json_raw("metric-/uptime", r#"{"MetricID":3}"#);
        deliver(&handlers.handler_set(), message).await;
        deliver(
            &handlers.handler_set(),
            WireMessage::plain("metric-/uptime", "not json"),
        )
        .await;

        let body = timeout(Duration::from_secs(1), client.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body, r#"{"MetricID":3}"#);
    }
}
