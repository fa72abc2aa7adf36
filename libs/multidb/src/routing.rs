//! Cluster routing table
//!
//! Maps a cluster id to the pool dedicated to it within one data domain and
//! falls back to the domain's default pool. One generic table serves every
//! domain; the domain is carried as data rather than as a separate type.

use crate::pool::ConnectionPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use types::{ClusterId, DataDomain};

pub struct ClusterRoutingTable<C> {
    domain: DataDomain,
    default_pool: Arc<ConnectionPool<C>>,
    by_cluster: HashMap<ClusterId, Arc<ConnectionPool<C>>>,
}

impl<C> std::fmt::Debug for ClusterRoutingTable<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut clusters: Vec<_> = self.by_cluster.keys().collect();
        clusters.sort();
        f.debug_struct("ClusterRoutingTable")
            .field("domain", &self.domain)
            .field("default_pool", &self.default_pool)
            .field("clusters", &clusters)
            .finish()
    }
}

impl<C> ClusterRoutingTable<C> {
    pub fn new(domain: DataDomain, default_pool: Arc<ConnectionPool<C>>) -> Self {
        Self {
            domain,
            default_pool,
            by_cluster: HashMap::new(),
        }
    }

    pub fn with_cluster(mut self, cluster_id: ClusterId, pool: Arc<ConnectionPool<C>>) -> Self {
        self.insert(cluster_id, pool);
        self
    }

    /// Pool serving `cluster_id`; the domain default when no override exists
    pub fn get(&self, cluster_id: ClusterId) -> &Arc<ConnectionPool<C>> {
        match self.by_cluster.get(&cluster_id) {
            Some(pool) => pool,
            None => {
                debug!(domain = %self.domain, %cluster_id, "Using default pool");
                &self.default_pool
            }
        }
    }

    /// Install or replace a cluster override (live reconfiguration)
    pub fn insert(
        &mut self,
        cluster_id: ClusterId,
        pool: Arc<ConnectionPool<C>>,
    ) -> Option<Arc<ConnectionPool<C>>> {
        info!(domain = %self.domain, %cluster_id, shards = pool.len(), "Cluster override installed");
        self.by_cluster.insert(cluster_id, pool)
    }

    pub fn remove(&mut self, cluster_id: ClusterId) -> Option<Arc<ConnectionPool<C>>> {
        let removed = self.by_cluster.remove(&cluster_id);
        if removed.is_some() {
            info!(domain = %self.domain, %cluster_id, "Cluster override removed");
        }
        removed
    }

    pub fn domain(&self) -> DataDomain {
        self.domain
    }

    pub fn default_pool(&self) -> &Arc<ConnectionPool<C>> {
        &self.default_pool
    }

    pub fn has_override(&self, cluster_id: ClusterId) -> bool {
        self.by_cluster.contains_key(&cluster_id)
    }

    /// Clusters with a dedicated pool, ascending
    pub fn cluster_ids(&self) -> Vec<ClusterId> {
        let mut ids: Vec<_> = self.by_cluster.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(label: &str) -> Arc<ConnectionPool<String>> {
        Arc::new(ConnectionPool::from_connections(vec![label.to_string()], 100).unwrap())
    }

    #[test]
    fn test_cluster_override_wins() {
        let table = ClusterRoutingTable::new(DataDomain::Metrics, pool("default"))
            .with_cluster(ClusterId::new(7), pool("cluster-7"));

        assert_eq!(table.get(ClusterId::new(7)).pick_next(), "cluster-7");
        assert!(table.has_override(ClusterId::new(7)));
    }

    #[test]
    fn test_unknown_cluster_falls_back_to_default() {
        let table = ClusterRoutingTable::new(DataDomain::Hosts, pool("default"))
            .with_cluster(ClusterId::new(7), pool("cluster-7"));

        assert_eq!(table.get(ClusterId::new(8)).pick_next(), "default");
        assert_eq!(table.get(ClusterId::new(-1)).pick_next(), "default");
    }

    #[test]
    fn test_live_reconfiguration() {
        let mut table = ClusterRoutingTable::new(DataDomain::Events, pool("default"));
        assert!(table.cluster_ids().is_empty());

        assert!(table.insert(ClusterId::new(2), pool("a")).is_none());
        assert!(table.insert(ClusterId::new(2), pool("b")).is_some());
        assert_eq!(table.get(ClusterId::new(2)).pick_next(), "b");
        assert_eq!(table.cluster_ids(), vec![ClusterId::new(2)]);

        assert!(table.remove(ClusterId::new(2)).is_some());
        assert_eq!(table.get(ClusterId::new(2)).pick_next(), "default");
        assert!(table.remove(ClusterId::new(2)).is_none());
    }
}
