use crate::connector::Connector;
use crate::error::{PoolError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A pool member that only remembers how it was opened
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryConnection {
    pub dsn: String,
    pub max_connections: Option<u32>,
}

/// Connector for tests: succeeds for every DSN except those containing
/// `unreachable`
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    connects: Arc<AtomicU64>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful connects so far
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("connection refused")]
struct Refused;

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self, dsn: &str, max_connections: Option<u32>) -> Result<MemoryConnection> {
        if dsn.contains("unreachable") {
            return Err(PoolError::connect(dsn, Refused));
        }

        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(MemoryConnection {
            dsn: dsn.to_string(),
            max_connections,
        })
    }
}
