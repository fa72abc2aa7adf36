//! # Multi-Database Routing
//!
//! Sharded connection pools for the master's data domains.
//!
//! ```text
//! cluster id ──▶ ClusterRoutingTable (per domain) ──▶ ConnectionPool ──▶ connection
//!                   │ override for this cluster?          │ pick_random / pick_next
//!                   └─ else domain default pool           └ pick_for_writes (replication)
//! ```
//!
//! Pools are generic over the connection type. Production code uses
//! [`PgConnector`] (sqlx `PgPool` members); tests use the in-memory
//! connector from `test_utils`, built with the `test-utils` feature.

pub mod connector;
pub mod domains;
pub mod error;
pub mod pool;
pub mod routing;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use connector::{Connector, PgConnector};
pub use domains::DomainPools;
pub use error::{redact_dsn, PoolError, Result};
pub use pool::ConnectionPool;
pub use routing::ClusterRoutingTable;
