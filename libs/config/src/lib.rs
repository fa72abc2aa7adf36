//! # ResourceD Master Configuration
//!
//! Centralized configuration loading and defaults for the master tier.
//!
//! ## Features
//!
//! - **Storage**: one connection-string list per data domain plus optional
//!   per-cluster overrides and a replication percentage
//! - **Message bus**: own listen URL, peer URLs, receive backoff bounds
//! - **Directed pub/sub**: named publisher/subscriber endpoints
//! - **Layering**: base TOML file, optional environment overlay, then
//!   `RESOURCED_` environment variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use master_config::load_config;
//!
//! let config = load_config("config/master.toml".as_ref(), Some("production")).unwrap();
//! let hosts = config.domain(types::DataDomain::Hosts);
//! println!("{} host shards", hosts.dsns().len());
//! ```

pub mod defaults;
pub mod master_config;

// Re-export commonly used types
pub use master_config::{
    default_config_path, load_config, CoreStorageConfig, DomainStorageConfig, LogFormat, MasterConfig,
    MessageBusConfig, PubSubConfig, PubSubMode,
};
