//! Host telemetry snapshots
//!
//! Agents report a document keyed by reader path (`/free`, `/uname`, ...) whose
//! values are arbitrarily nested JSON objects. Metric fan-out and JSON-path
//! filters both address leaves by dot-joining the reader path with the nested
//! keys, e.g. `/free.Memory.Free`.

use crate::cluster::ClusterId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Flattened host data: dot-joined leaf path → scalar JSON value
pub type FlatHostData = BTreeMap<String, Value>;

/// One host's latest snapshot as handed over by host ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRow {
    pub cluster_id: ClusterId,
    pub hostname: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub data: Value,
}

impl HostRow {
    pub fn new(cluster_id: ClusterId, hostname: impl Into<String>, data: Value) -> Self {
        Self {
            cluster_id,
            hostname: hostname.into(),
            tags: BTreeMap::new(),
            data,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Flatten `data` into `reader_path.nested.key` → leaf value pairs.
    ///
    /// Top-level entries that are not objects carry no reader payload and are
    /// skipped. Array elements are addressed by their index.
    pub fn data_as_flat_key_value(&self) -> FlatHostData {
        let mut flattened = FlatHostData::new();

        let Some(readers) = self.data.as_object() else {
            return flattened;
        };

        for (path, inner) in readers {
            if inner.is_object() {
                flatten_into(inner, path, &mut flattened);
            }
        }

        flattened
    }
}

fn flatten_into(value: &Value, prefix: &str, out: &mut FlatHostData) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(child, &format!("{}.{}", prefix, key), out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(child, &format!("{}.{}", prefix, index), out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf.clone());
        }
    }
}
