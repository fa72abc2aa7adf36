//! Sharded Connection Pool
//!
//! Owns the ordered connections of one shard group and decides which of them
//! serve a read or receive a replicated write.
//!
//! ## Features
//!
//! - **Random pick**: uniform over all members, generator seeded once
//! - **Round-robin pick**: insertion order, deterministic wrap, serialized cursor
//! - **Replicated writes**: `ceil(percentage / 100 * N)` distinct members
//!
//! ## Invariants
//!
//! A pool is never empty once constructed. Construction connects every
//! member up front and fails as a whole if any member fails.

use crate::connector::Connector;
use crate::error::{PoolError, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Debug;
use tracing::info;

/// One shard group's backing-store connections
pub struct ConnectionPool<C> {
    connections: Vec<C>,
    dsns: Vec<String>,
    replication_percentage: u8,
    cursor: Mutex<usize>,
    rng: Mutex<StdRng>,
}

impl<C> Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("size", &self.connections.len())
            .field("replication_percentage", &self.replication_percentage)
            .field("cursor", &*self.cursor.lock())
            .finish_non_exhaustive()
    }
}

impl<C> ConnectionPool<C> {
    /// Connect every DSN in order; any failure discards the whole pool
    pub async fn connect<K>(
        connector: &K,
        dsns: &[String],
        replication_percentage: u8,
        max_connections: Option<u32>,
    ) -> Result<Self>
    where
        K: Connector<Connection = C>,
    {
        validate(dsns.len(), replication_percentage)?;

        let mut connections = Vec::with_capacity(dsns.len());
        for dsn in dsns {
            connections.push(connector.connect(dsn, max_connections).await?);
        }

        info!(
            shards = connections.len(),
            replication_percentage, "Connection pool ready"
        );

        Ok(Self::build(connections, dsns.to_vec(), replication_percentage))
    }

    /// Build a pool from already established connections
    pub fn from_connections(connections: Vec<C>, replication_percentage: u8) -> Result<Self> {
        validate(connections.len(), replication_percentage)?;
        let dsns = vec![String::new(); connections.len()];
        Ok(Self::build(connections, dsns, replication_percentage))
    }

    fn build(connections: Vec<C>, dsns: Vec<String>, replication_percentage: u8) -> Self {
        Self {
            connections,
            dsns,
            replication_percentage,
            cursor: Mutex::new(0),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the random source, e.g. with a fixed seed for reproducible picks
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Uniformly random member
    pub fn pick_random(&self) -> &C {
        let index = self.rng.lock().gen_range(0..self.connections.len());
        &self.connections[index]
    }

    /// Next member in round-robin order, starting from the first
    pub fn pick_next(&self) -> &C {
        let mut cursor = self.cursor.lock();
        let index = *cursor;
        *cursor = (index + 1) % self.connections.len();
        &self.connections[index]
    }

    /// Members that must receive a replicated write: `ceil(pct / 100 * N)`
    pub fn replica_count(&self) -> usize {
        let n = self.connections.len();
        let count = (f64::from(self.replication_percentage) / 100.0 * n as f64).ceil() as usize;
        count.min(n)
    }

    /// `replica_count()` distinct members sampled uniformly at random
    pub fn pick_for_writes(&self) -> Vec<&C> {
        let amount = self.replica_count();
        let indices = {
            let mut rng = self.rng.lock();
            rand::seq::index::sample(&mut *rng, self.connections.len(), amount)
        };
        indices.into_iter().map(|i| &self.connections[i]).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Always false for a constructed pool
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn replication_percentage(&self) -> u8 {
        self.replication_percentage
    }

    /// Members in insertion order
    pub fn all(&self) -> &[C] {
        &self.connections
    }

    /// Connection strings in insertion order; blank for pools built from
    /// existing connections
    pub fn dsns(&self) -> &[String] {
        &self.dsns
    }
}

fn validate(size: usize, replication_percentage: u8) -> Result<()> {
    if size == 0 {
        return Err(PoolError::config("a pool needs at least one connection"));
    }
    if replication_percentage > 100 {
        return Err(PoolError::config(format!(
            "replication percentage must be between 0 and 100, got {}",
            replication_percentage
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryConnector;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn labelled(n: usize, pct: u8) -> ConnectionPool<String> {
        let conns = (0..n).map(|i| format!("db-{}", i)).collect();
        ConnectionPool::from_connections(conns, pct).unwrap()
    }

    #[test]
    fn test_replica_count_rounds_up() {
        assert_eq!(labelled(2, 100).replica_count(), 2);
        assert_eq!(labelled(2, 50).replica_count(), 1);
        assert_eq!(labelled(3, 50).replica_count(), 2); // 1.5 -> 2
        assert_eq!(labelled(10, 25).replica_count(), 3); // 2.5 -> 3
        assert_eq!(labelled(10, 72).replica_count(), 8); // 7.2 -> 8
        assert_eq!(labelled(4, 0).replica_count(), 0);
    }

    #[test]
    fn test_pick_next_cycles_in_insertion_order() {
        let pool = labelled(3, 100);

        let picks: Vec<_> = (0..7).map(|_| pool.pick_next().clone()).collect();
        assert_eq!(
            picks,
            vec!["db-0", "db-1", "db-2", "db-0", "db-1", "db-2", "db-0"]
        );
    }

    #[test]
    fn test_pick_next_single_member() {
        let pool = labelled(1, 100);
        for _ in 0..5 {
            assert_eq!(pool.pick_next(), "db-0");
        }
    }

    #[test]
    fn test_pick_next_concurrent_callers_visit_evenly() {
        let pool = Arc::new(labelled(4, 100));
        let mut handles = vec![];

        for _ in 0..4 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                (0..100).map(|_| pool.pick_next().clone()).collect::<Vec<_>>()
            }));
        }

        let mut counts = std::collections::HashMap::new();
        for handle in handles {
            for pick in handle.join().unwrap() {
                *counts.entry(pick).or_insert(0) += 1;
            }
        }

        // 400 serialized picks over 4 members
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|c| *c == 100));
    }

    #[test]
    fn test_pick_random_stays_in_pool() {
        let pool = labelled(5, 100).with_rng(StdRng::seed_from_u64(7));
        let mut seen = HashSet::new();

        for _ in 0..500 {
            seen.insert(pool.pick_random().clone());
        }

        // Rapid successive calls must still cover every member
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn test_pick_for_writes_size_and_distinctness() {
        let pool = labelled(3, 50);
        let picks = pool.pick_for_writes();
        assert_eq!(picks.len(), 2);
        assert!(picks.len() < pool.len());

        let pool = labelled(10, 72);
        let picks = pool.pick_for_writes();
        assert_eq!(picks.len(), 8);
        let distinct: HashSet<_> = picks.iter().collect();
        assert_eq!(distinct.len(), 8);

        let pool = labelled(2, 100);
        assert_eq!(pool.pick_for_writes().len(), 2);
    }

    #[test]
    fn test_empty_pool_is_config_error() {
        let err = ConnectionPool::<String>::from_connections(vec![], 100).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_percentage_above_100_rejected() {
        let err = ConnectionPool::from_connections(vec!["db".to_string()], 101).unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_connect_all_members() {
        let connector = MemoryConnector::new();
        let dsns = vec!["mem://a".to_string(), "mem://b".to_string()];

        let pool = ConnectionPool::connect(&connector, &dsns, 100, None)
            .await
            .unwrap();

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.dsns(), &dsns[..]);
        assert_eq!(pool.all()[1].dsn, "mem://b");
    }

    #[tokio::test]
    async fn test_connect_failure_discards_pool() {
        let connector = MemoryConnector::new();
        let dsns = vec![
            "mem://a".to_string(),
            "mem://unreachable".to_string(),
            "mem://c".to_string(),
        ];

        let err = ConnectionPool::connect(&connector, &dsns, 100, None)
            .await
            .unwrap_err();

        assert!(matches!(err, PoolError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_connect_without_dsns() {
        let connector = MemoryConnector::new();
        let err = ConnectionPool::connect(&connector, &[], 100, None)
            .await
            .unwrap_err();
        assert!(err.is_config_error());
    }
}
