//! Metric catalog and published metric events

use crate::cluster::ClusterId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stable numeric metric identifier
pub type MetricId = i64;

/// Flattened-path metric key → metric id, read-only during fan-out
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricCatalog {
    metrics: HashMap<String, MetricId>,
}

impl MetricCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, id: MetricId) -> Option<MetricId> {
        self.metrics.insert(key.into(), id)
    }

    pub fn get(&self, key: &str) -> Option<MetricId> {
        self.metrics.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, MetricId)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, MetricId)> for MetricCatalog {
    fn from_iter<I: IntoIterator<Item = (String, MetricId)>>(iter: I) -> Self {
        Self {
            metrics: iter.into_iter().collect(),
        }
    }
}

/// One metric sample as published on `metric-<MetricKey>` topics.
///
/// Field names are part of the bus contract shared with streaming consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    #[serde(rename = "ClusterID")]
    pub cluster_id: ClusterId,
    #[serde(rename = "MetricID")]
    pub metric_id: MetricId,
    #[serde(rename = "MetricKey")]
    pub metric_key: String,
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "Value")]
    pub value: f64,
    #[serde(rename = "CreatedMillisecond")]
    pub created_millisecond: i64,
}
