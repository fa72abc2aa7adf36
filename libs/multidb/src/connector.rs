//! Backing-store connectors
//!
//! A [`Connector`] turns one connection string into one pool member. The
//! PostgreSQL implementation hands out `sqlx::PgPool` handles, so a single
//! member is itself a small client-side pool bounded by
//! `max_open_connections`.

use crate::error::{PoolError, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

/// Factory for pool members
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Send + Sync + 'static;

    async fn connect(&self, dsn: &str, max_connections: Option<u32>)
        -> Result<Self::Connection>;
}

/// PostgreSQL connector backed by sqlx
#[derive(Debug, Clone, Default)]
pub struct PgConnector;

impl PgConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgPool;

    async fn connect(&self, dsn: &str, max_connections: Option<u32>) -> Result<PgPool> {
        let mut options = PgPoolOptions::new();
        if let Some(max) = max_connections.filter(|max| *max > 0) {
            options = options.max_connections(max);
        }

        let pool = options
            .connect(dsn)
            .await
            .map_err(|e| PoolError::connect(dsn, e))?;

        debug!(dsn = %crate::error::redact_dsn(dsn), "Connected to PostgreSQL");
        Ok(pool)
    }
}
