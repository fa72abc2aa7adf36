//! Metric fan-out
//!
//! Turns one host snapshot into per-metric events on `metric-<key>` topics.
//! Fan-out is fire-and-forget: a sample that fails to serialize or send is
//! logged and skipped so the rest of the snapshot still goes out.

use crate::error::Result;
use crate::wire::WireMessage;
use async_trait::async_trait;
use tracing::{debug, error};
use types::{HostRow, MetricCatalog, MetricEvent};

/// Topic prefix for metric events
pub const METRIC_TOPIC_PREFIX: &str = "metric-";

/// Anything that can put a frame on the wire
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    /// Send one message; returns how many connections it was written to
    async fn publish_message(&self, message: WireMessage) -> Result<usize>;
}

pub fn metric_topic(metric_key: &str) -> String {
    format!("{}{}", METRIC_TOPIC_PREFIX, metric_key)
}

/// Publish every catalogued numeric leaf of `host`; returns how many
/// events were handed to the publisher successfully.
pub async fn publish_metrics_by_host_row<P>(
    publisher: &P,
    host: &HostRow,
    catalog: &MetricCatalog,
) -> usize
where
    P: TopicPublisher + ?Sized,
{
    let mut published = 0;

    for (metric_key, value) in host.data_as_flat_key_value() {
        let Some(metric_id) = catalog.get(&metric_key) else {
            continue;
        };
        let Some(value) = value.as_f64() else {
            continue;
        };

        let event = MetricEvent {
            cluster_id: host.cluster_id,
            metric_id,
            metric_key,
            hostname: host.hostname.clone(),
            value,
            created_millisecond: chrono::Utc::now().timestamp_millis(),
        };

        let message = match WireMessage::json(metric_topic(&event.metric_key), &event) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    metric_id,
                    metric_key = %event.metric_key,
                    hostname = %event.hostname,
                    error = %e,
                    "Failed to serialize metric for message bus"
                );
                continue;
            }
        };

        match publisher.publish_message(message).await {
            Ok(_) => published += 1,
            Err(e) => error!(
                metric_id,
                metric_key = %event.metric_key,
                hostname = %event.hostname,
                error = %e,
                "Failed to publish metric to message bus"
            ),
        }
    }

    debug!(hostname = %host.hostname, published, "Metric fan-out complete");
    published
}
