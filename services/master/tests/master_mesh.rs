//! Two master nodes over loopback with in-memory storage connectors

use master_config::MasterConfig;
use multidb::test_utils::{MemoryConnection, MemoryConnector};
use resourced_master::Master;
use serde_json::json;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use types::{ClusterId, HostRow, MetricCatalog, MetricEvent};

const WAIT: Duration = Duration::from_secs(10);

fn config(addr: &str, peers: &[String]) -> MasterConfig {
    let peers = peers
        .iter()
        .map(|p| format!("\"{}\"", p))
        .collect::<Vec<_>>()
        .join(", ");

    MasterConfig::from_toml_str(&format!(
        r#"
addr = "{addr}"
heartbeat_interval_secs = 1

[postgresql]
dsn = "mem://core"

[hosts]
dsn = "mem://hosts"
[metrics]
dsns = ["mem://metrics-1", "mem://metrics-2"]
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
peers = [{peers}]
receive_backoff_ms = 10
receive_backoff_max_ms = 100
"#
    ))
    .unwrap()
}

async fn start(addr: &str, hostname: &str, peers: &[String]) -> Master<MemoryConnection> {
    Master::start(&MemoryConnector::new(), config(addr, peers), hostname.to_string())
        .await
        .unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_heartbeats_make_nodes_know_each_other() {
    let a = start(":55655", "master-a", &[]).await;
    let a_url = a.bus().local_endpoint().to_string();
    let b = start(":55656", "master-b", &[a_url]).await;

    let a_peers = a.peers().clone();
    let b_peers = b.peers().clone();
    let a_refetch = a.refetch().clone();

    let (stop_a, stopped_a) = oneshot::channel::<()>();
    let (stop_b, stopped_b) = oneshot::channel::<()>();
    let run_a = tokio::spawn(a.run_until(async {
        let _ = stopped_a.await;
    }));
    let run_b = tokio::spawn(b.run_until(async {
        let _ = stopped_b.await;
    }));

    wait_until(|| a_peers.is_alive("master-b:55656") && b_peers.is_alive("master-a:55655")).await;
    assert!(a_refetch.requests() > 0);

    stop_a.send(()).unwrap();
    stop_b.send(()).unwrap();
    timeout(WAIT, run_a).await.unwrap().unwrap().unwrap();
    timeout(WAIT, run_b).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_ingested_host_streams_to_peer_clients() {
    let a = start(":55655", "master-a", &[]).await;
    let a_url = a.bus().local_endpoint().to_string();
    let b = start(":55656", "master-b", &[a_url]).await;

    let a_bus = a.bus().clone();
    let registry = a_bus.registry().clone();
    let mut client = registry.register().unwrap();

    let (_stop_a, stopped_a) = oneshot::channel::<()>();
    tokio::spawn(a.run_until(async {
        let _ = stopped_a.await;
    }));

    wait_until(|| a_bus.peer_count() == 1 && b.bus().peer_count() == 1).await;
    wait_until(|| registry.client_count() == 1).await;

    let host = HostRow::new(
        ClusterId::new(4),
        "web-01",
        json!({"/free": {"Memory": {"Free": 2048}}, "/uname": {"Sysname": "Linux"}}),
    );
    let catalog: MetricCatalog = [
        ("/free.Memory.Free".to_string(), 11),
        ("/uname.Sysname".to_string(), 12),
    ]
    .into_iter()
    .collect();

    assert_eq!(b.ingest_host(&host, &catalog).await, 1);

    let body = timeout(WAIT, client.recv()).await.unwrap().unwrap();
    let event: MetricEvent = serde_json::from_str(&body).unwrap();
    assert_eq!(event.metric_id, 11);
    assert_eq!(event.value, 2048.0);
    assert_eq!(event.hostname, "web-01");
    assert_eq!(event.cluster_id, ClusterId::new(4));
}

#[tokio::test]
async fn test_unreachable_storage_aborts_startup() {
    let mut config = config(":55655", &[]);
    config.hosts.dsns = vec!["mem://unreachable".to_string()];
    config.hosts.dsn = None;

    let result =
        Master::start(&MemoryConnector::new(), config, "master-a".to_string()).await;
    assert!(result.is_err());
}
