//! Pools for every data domain
//!
//! Builds the core pool and one [`ClusterRoutingTable`] per [`DataDomain`]
//! from configuration in a single step, so startup either gets every pool or
//! fails with the first configuration or connection error.

use crate::connector::Connector;
use crate::error::{PoolError, Result};
use crate::pool::ConnectionPool;
use crate::routing::ClusterRoutingTable;
use master_config::{DomainStorageConfig, MasterConfig};
use std::sync::Arc;
use tracing::info;
use types::{ClusterId, DataDomain};

pub struct DomainPools<C> {
    core: Arc<ConnectionPool<C>>,
    /// One table per domain, in `DataDomain::ALL` order
    tables: Vec<ClusterRoutingTable<C>>,
}

impl<C> std::fmt::Debug for DomainPools<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainPools")
            .field("core", &self.core)
            .field("tables", &self.tables)
            .finish()
    }
}

impl<C: Send + Sync + 'static> DomainPools<C> {
    pub async fn connect<K>(connector: &K, config: &MasterConfig) -> Result<Self>
    where
        K: Connector<Connection = C>,
    {
        let core = ConnectionPool::connect(
            connector,
            std::slice::from_ref(&config.postgresql.dsn),
            100,
            config.postgresql.max_open_connections,
        )
        .await?;

        let mut tables = Vec::with_capacity(DataDomain::ALL.len());
        for domain in DataDomain::ALL {
            tables.push(build_table(connector, domain, config.domain(domain)).await?);
        }

        Ok(Self {
            core: Arc::new(core),
            tables,
        })
    }
}

async fn build_table<K: Connector>(
    connector: &K,
    domain: DataDomain,
    storage: &DomainStorageConfig,
) -> Result<ClusterRoutingTable<K::Connection>> {
    let dsns = storage.dsns();
    if dsns.is_empty() {
        return Err(PoolError::config(format!(
            "[{}] needs at least one connection string",
            domain
        )));
    }

    let default_pool = ConnectionPool::connect(
        connector,
        &dsns,
        storage.replication_percentage,
        storage.max_open_connections,
    )
    .await?;

    let mut table = ClusterRoutingTable::new(domain, Arc::new(default_pool));

    let overrides = storage
        .cluster_overrides()
        .map_err(|e| PoolError::config(format!("[{}] {:#}", domain, e)))?;

    for (cluster_id, dsn) in overrides {
        let pool = ConnectionPool::connect(
            connector,
            std::slice::from_ref(&dsn),
            storage.replication_percentage,
            storage.max_open_connections,
        )
        .await?;
        table.insert(cluster_id, Arc::new(pool));
    }

    info!(
        domain = %domain,
        shards = dsns.len(),
        cluster_overrides = storage.dsn_by_cluster_id.len(),
        "Domain pools connected"
    );
    Ok(table)
}

impl<C> DomainPools<C> {
    /// Core database (users, clusters, access tokens)
    pub fn core(&self) -> &Arc<ConnectionPool<C>> {
        &self.core
    }

    pub fn table(&self, domain: DataDomain) -> &ClusterRoutingTable<C> {
        &self.tables[domain_index(domain)]
    }

    pub fn table_mut(&mut self, domain: DataDomain) -> &mut ClusterRoutingTable<C> {
        &mut self.tables[domain_index(domain)]
    }

    /// Pool serving `cluster_id` for `domain`
    pub fn get(&self, domain: DataDomain, cluster_id: ClusterId) -> &Arc<ConnectionPool<C>> {
        self.table(domain).get(cluster_id)
    }
}

fn domain_index(domain: DataDomain) -> usize {
    match domain {
        DataDomain::Hosts => 0,
        DataDomain::Metrics => 1,
        DataDomain::MetricsAggr15m => 2,
        DataDomain::Events => 3,
        DataDomain::Logs => 4,
        DataDomain::Checks => 5,
        DataDomain::ExecutorLogs => 6,
    }
}
