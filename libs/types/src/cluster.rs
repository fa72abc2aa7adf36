//! Cluster identity and data domain naming
//!
//! A cluster is a tenant/shard boundary. Every data domain can route a
//! cluster to its own connection pool, so both values travel together through
//! the storage layer.

use crate::error::{Result, TypesError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric tenant/shard identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(i64);

impl ClusterId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn inner(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ClusterId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for ClusterId {
    type Err = TypesError;

    /// Parse the string keys used by `dsn_by_cluster_id` configuration maps
    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| TypesError::InvalidClusterId {
                input: s.to_string(),
            })
    }
}

/// Category of stored data; each one is sharded independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataDomain {
    Hosts,
    Metrics,
    MetricsAggr15m,
    Events,
    Logs,
    Checks,
    ExecutorLogs,
}

impl DataDomain {
    /// Every shardable domain, in configuration order
    pub const ALL: [DataDomain; 7] = [
        DataDomain::Hosts,
        DataDomain::Metrics,
        DataDomain::MetricsAggr15m,
        DataDomain::Events,
        DataDomain::Logs,
        DataDomain::Checks,
        DataDomain::ExecutorLogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataDomain::Hosts => "hosts",
            DataDomain::Metrics => "metrics",
            DataDomain::MetricsAggr15m => "metrics_aggr_15m",
            DataDomain::Events => "events",
            DataDomain::Logs => "logs",
            DataDomain::Checks => "checks",
            DataDomain::ExecutorLogs => "executor_logs",
        }
    }
}

impl fmt::Display for DataDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataDomain {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        // Accept the hyphenated spelling used on the command line as well
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        DataDomain::ALL
            .iter()
            .copied()
            .find(|domain| domain.as_str() == normalized)
            .ok_or_else(|| TypesError::UnknownDomain {
                name: s.to_string(),
            })
    }
}
