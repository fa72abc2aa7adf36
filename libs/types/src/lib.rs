//! # ResourceD Master Types
//!
//! Shared domain types used by the storage routing, message bus and query
//! layers of the master tier.
//!
//! ## Contents
//!
//! - **Cluster identity**: [`ClusterId`] selects which connection pool serves a
//!   tenant's data; [`DataDomain`] names the independently sharded categories.
//! - **Host snapshots**: [`HostRow`] carries one host's hierarchical telemetry
//!   document and knows how to flatten it into dot-joined leaf paths.
//! - **Metrics**: [`MetricCatalog`] maps flattened keys to stable metric ids and
//!   [`MetricEvent`] is the JSON body published for every matching sample.
//!
//! ## Usage
//!
//! ```rust
//! use types::{ClusterId, HostRow, MetricCatalog};
//!
//! let row = HostRow::new(
//!     ClusterId::new(1),
//!     "web-01",
//!     serde_json::json!({"/free": {"Swap": {"Free": 0}}}),
//! );
//!
//! let mut catalog = MetricCatalog::new();
//! catalog.insert("/free.Swap.Free", 7);
//!
//! let flat = row.data_as_flat_key_value();
//! assert!(catalog.get("/free.Swap.Free").is_some());
//! assert!(flat.contains_key("/free.Swap.Free"));
//! ```

pub mod cluster;
pub mod error;
pub mod host;
pub mod metric;

pub use cluster::{ClusterId, DataDomain};
pub use error::{Result, TypesError};
pub use host::{FlatHostData, HostRow};
pub use metric::{MetricCatalog, MetricEvent, MetricId};
