//! Master node wiring
//!
//! ```text
//! MasterConfig ─► DomainPools ─┐
//!               ─► MessageBus ─┼─► handlers ─► receive loop task
//!               ─► PubSubs    ─┘    heartbeat task
//!                                   refetch task
//! ```

use crate::handlers::{MasterHandlers, RefetchSignal};
use crate::peers::PeerSet;
use anyhow::{Context, Result};
use master_config::{defaults, MasterConfig, PubSubMode};
use message_bus::{
    publish_metrics_by_host_row, BusOptions, MessageBus, PubSubs, PEERS_HEARTBEAT_TOPIC,
};
use multidb::{Connector, DomainPools};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::{HostRow, MetricCatalog};

pub struct Master<C> {
    config: MasterConfig,
    hostname: String,
    pools: Arc<DomainPools<C>>,
    bus: Arc<MessageBus>,
    pubsubs: PubSubs,
    handlers: MasterHandlers,
}

impl<C: Send + Sync + 'static> Master<C> {
    /// Connect storage, bind the bus and directed publishers, dial peers.
    /// Any failure here aborts startup.
    pub async fn start<K>(connector: &K, config: MasterConfig, hostname: String) -> Result<Self>
    where
        K: Connector<Connection = C>,
    {
        let pools = DomainPools::connect(connector, &config)
            .await
            .context("Failed to connect storage pools")?;
        info!("Storage pools connected");

        let bus = MessageBus::listen(&config.message_bus.url, bus_options(&config))
            .await
            .with_context(|| format!("Failed to listen on {}", config.message_bus.url))?;
        bus.dial_others(&config.message_bus.peers)
            .context("Invalid message bus peer")?;

        let pubsubs = PubSubs::start(
            &config.pubsub_urls(PubSubMode::Pub),
            &config.pubsub_urls(PubSubMode::Sub),
            defaults::bus::MAX_FRAME_SIZE,
        )
        .await
        .context("Failed to bind pubsub publishers")?;

        let handlers = MasterHandlers {
            peers: Arc::new(PeerSet::new(Duration::from_secs(config.peer_ttl_secs))),
            refetch: Arc::new(RefetchSignal::new()),
            registry: bus.registry().clone(),
        };

        info!(
            hostname = %hostname,
            addr = %config.full_addr(&hostname),
            bus = %bus.local_endpoint(),
            peers = config.message_bus.peers.len(),
            "Master started"
        );

        Ok(Self {
            config,
            hostname,
            pools: Arc::new(pools),
            bus: Arc::new(bus),
            pubsubs,
            handlers,
        })
    }

    /// Serve until `shutdown` resolves, then stop every task
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let signal = self.bus.shutdown_signal();

        let receive = {
            let bus = self.bus.clone();
            let handler_set = self.handlers.handler_set();
            let signal = signal.clone();
            tokio::spawn(async move { bus.run(handler_set, signal).await })
        };

        let heartbeat = spawn_heartbeat(
            self.bus.clone(),
            self.config.full_addr(&self.hostname),
            Duration::from_secs(self.config.heartbeat_interval_secs.max(1)),
            signal.clone(),
        );

        let refetch = spawn_refetch_listener(self.handlers.clone(), signal.clone());

        shutdown.await;
        info!("Shutdown signal received");
        self.bus.shutdown();

        let (receive, heartbeat, refetch) = tokio::join!(receive, heartbeat, refetch);
        for (task, result) in [("heartbeat", heartbeat), ("refetch", refetch)] {
            if let Err(e) = result {
                warn!(task, error = %e, "Task ended abnormally");
            }
        }
        receive.context("Receive loop panicked")??;

        info!("Master stopped");
        Ok(())
    }

    /// Fan one host snapshot out to the mesh and every directed publisher.
    /// Returns the number of metric events published on the mesh.
    pub async fn ingest_host(&self, host: &HostRow, catalog: &MetricCatalog) -> usize {
        let published = publish_metrics_by_host_row(self.bus.as_ref(), host, catalog).await;
        publish_metrics_by_host_row(&self.pubsubs, host, catalog).await;
        published
    }

    pub fn pools(&self) -> &Arc<DomainPools<C>> {
        &self.pools
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn pubsubs(&self) -> &PubSubs {
        &self.pubsubs
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.handlers.peers
    }

    pub fn refetch(&self) -> &Arc<RefetchSignal> {
        &self.handlers.refetch
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

fn bus_options(config: &MasterConfig) -> BusOptions {
    BusOptions {
        max_frame_size: defaults::bus::MAX_FRAME_SIZE,
        backoff: Duration::from_millis(config.message_bus.receive_backoff_ms),
        backoff_max: Duration::from_millis(config.message_bus.receive_backoff_max_ms),
        ..BusOptions::default()
    }
}

/// Publish own address on `peers-heartbeat` every `interval`
fn spawn_heartbeat(
    bus: Arc<MessageBus>,
    full_addr: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            match bus.publish(PEERS_HEARTBEAT_TOPIC, &full_addr).await {
                Ok(peers) => debug!(peers, "Heartbeat sent"),
                Err(e) => error!(error = %e, "Error when sending heartbeat"),
            }
        }
    })
}

/// Logs each coalesced checks refetch request and prunes expired peers
fn spawn_refetch_listener(
    handlers: MasterHandlers,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = handlers.refetch.wait() => {}
                _ = shutdown.changed() => break,
            }

            handlers.peers.prune();
            info!(
                requests = handlers.refetch.requests(),
                peers = ?handlers.peers.alive(),
                "Checks refetch requested"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_options_from_config() {
        let config = MasterConfig::from_toml_str(
            r#"
addr = ":55655"

[postgresql]
dsn = "mem://core"

[hosts]
dsn = "mem://hosts"
[metrics]
dsn = "mem://metrics"
[metrics_aggr_15m]
dsn = "mem://aggr"
[events]
dsn = "mem://events"
[logs]
dsn = "mem://logs"
[checks]
dsn = "mem://checks"
[executor_logs]
dsn = "mem://executor-logs"

[message_bus]
url = "tcp://127.0.0.1:0"
receive_backoff_ms = 10
receive_backoff_max_ms = 200
"#,
        )
        .unwrap();

        let options = bus_options(&config);
        assert_eq!(options.backoff, Duration::from_millis(10));
        assert_eq!(options.backoff_max, Duration::from_millis(200));
    }
}
