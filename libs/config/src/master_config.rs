//! Master Configuration Module
//!
//! Provides configuration loading and validation for the master service.
//! Supports loading from TOML files with environment-specific overrides.

use crate::defaults;
use anyhow::{bail, ensure, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use types::{ClusterId, DataDomain};

/// Main master configuration structure
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MasterConfig {
    /// HTTP listen address, also advertised to peers in heartbeats
    pub addr: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_peer_ttl_secs")]
    pub peer_ttl_secs: u64,

    /// Core database (users, clusters, access tokens)
    pub postgresql: CoreStorageConfig,

    pub hosts: DomainStorageConfig,
    pub metrics: DomainStorageConfig,
    pub metrics_aggr_15m: DomainStorageConfig,
    pub events: DomainStorageConfig,
    pub logs: DomainStorageConfig,
    pub checks: DomainStorageConfig,
    pub executor_logs: DomainStorageConfig,

    pub message_bus: MessageBusConfig,

    /// Directed publisher/subscriber streams by name
    #[serde(default)]
    pub pubsubs: HashMap<String, PubSubConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Core database settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CoreStorageConfig {
    pub dsn: String,
    pub max_open_connections: Option<u32>,
}

/// Storage settings for one sharded data domain
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DomainStorageConfig {
    /// Shorthand for a single-shard domain
    pub dsn: Option<String>,

    /// Shard connection strings, in pool order
    #[serde(default)]
    pub dsns: Vec<String>,

    #[serde(default = "default_replication_percentage")]
    pub replication_percentage: u8,

    pub max_open_connections: Option<u32>,

    /// Cluster id (as string) → dedicated connection string
    #[serde(default)]
    pub dsn_by_cluster_id: HashMap<String, String>,

    /// Retention in days for time-series domains
    pub data_retention: Option<u32>,
}

/// Mesh bus settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MessageBusConfig {
    /// Own listen address: `tcp://host:port` or `ipc:///path`
    pub url: String,

    /// Peer masters to dial
    #[serde(default)]
    pub peers: Vec<String>,

    #[serde(default = "default_receive_backoff_ms")]
    pub receive_backoff_ms: u64,

    #[serde(default = "default_receive_backoff_max_ms")]
    pub receive_backoff_max_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PubSubMode {
    Pub,
    Sub,
}

/// One directed publisher or subscriber endpoint
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PubSubConfig {
    pub mode: PubSubMode,
    pub url: String,
}

fn default_log_level() -> String {
    defaults::service::LOG_LEVEL.to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    defaults::service::HEARTBEAT_INTERVAL_SECS
}

fn default_peer_ttl_secs() -> u64 {
    defaults::service::PEER_TTL_SECS
}

fn default_replication_percentage() -> u8 {
    defaults::storage::REPLICATION_PERCENTAGE
}

fn default_receive_backoff_ms() -> u64 {
    defaults::bus::RECEIVE_BACKOFF_MS
}

fn default_receive_backoff_max_ms() -> u64 {
    defaults::bus::RECEIVE_BACKOFF_MAX_MS
}

impl DomainStorageConfig {
    /// All shard connection strings, the `dsn` shorthand first
    pub fn dsns(&self) -> Vec<String> {
        self.dsn
            .iter()
            .chain(self.dsns.iter())
            .filter(|dsn| !dsn.trim().is_empty())
            .cloned()
            .collect()
    }

    /// Per-cluster overrides with parsed cluster ids
    pub fn cluster_overrides(&self) -> Result<Vec<(ClusterId, String)>> {
        let mut overrides = Vec::with_capacity(self.dsn_by_cluster_id.len());
        for (key, dsn) in &self.dsn_by_cluster_id {
            let cluster_id = key
                .parse::<ClusterId>()
                .with_context(|| format!("Invalid dsn_by_cluster_id key '{}'", key))?;
            overrides.push((cluster_id, dsn.clone()));
        }
        overrides.sort_by_key(|(id, _)| *id);
        Ok(overrides)
    }

    fn expand_env_vars(&mut self, domain: &str) -> Result<()> {
        if let Some(dsn) = &self.dsn {
            self.dsn = Some(expand(dsn, domain)?);
        }
        for dsn in &mut self.dsns {
            *dsn = expand(dsn, domain)?;
        }
        for dsn in self.dsn_by_cluster_id.values_mut() {
            *dsn = expand(dsn, domain)?;
        }
        Ok(())
    }
}

fn expand(value: &str, what: &str) -> Result<String> {
    let expanded = shellexpand::env(value)
        .with_context(|| format!("Failed to expand environment variables in {}", what))?;
    Ok(expanded.to_string())
}

impl MasterConfig {
    /// Load configuration from files with environment overrides
    pub fn load(base_path: &Path, environment: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder().add_source(File::from(base_path).required(true));

        // Add environment-specific overrides if specified
        if let Some(env) = environment {
            let env_file = base_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("environments")
                .join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables (RESOURCED_ prefix)
        builder = builder.add_source(
            Environment::with_prefix(defaults::service::ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Parse configuration from a TOML string without layering
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Storage settings for one data domain
    pub fn domain(&self, domain: DataDomain) -> &DomainStorageConfig {
        match domain {
            DataDomain::Hosts => &self.hosts,
            DataDomain::Metrics => &self.metrics,
            DataDomain::MetricsAggr15m => &self.metrics_aggr_15m,
            DataDomain::Events => &self.events,
            DataDomain::Logs => &self.logs,
            DataDomain::Checks => &self.checks,
            DataDomain::ExecutorLogs => &self.executor_logs,
        }
    }

    fn domain_mut(&mut self, domain: DataDomain) -> &mut DomainStorageConfig {
        match domain {
            DataDomain::Hosts => &mut self.hosts,
            DataDomain::Metrics => &mut self.metrics,
            DataDomain::MetricsAggr15m => &mut self.metrics_aggr_15m,
            DataDomain::Events => &mut self.events,
            DataDomain::Logs => &mut self.logs,
            DataDomain::Checks => &mut self.checks,
            DataDomain::ExecutorLogs => &mut self.executor_logs,
        }
    }

    /// Expand `${VAR}` references in connection strings and bus URLs
    pub fn expand_env_vars(&mut self) -> Result<()> {
        self.postgresql.dsn = expand(&self.postgresql.dsn, "postgresql.dsn")?;

        for domain in DataDomain::ALL {
            self.domain_mut(domain).expand_env_vars(domain.as_str())?;
        }

        self.message_bus.url = expand(&self.message_bus.url, "message_bus.url")?;
        for peer in &mut self.message_bus.peers {
            *peer = expand(peer, "message_bus.peers")?;
        }

        for (name, pubsub) in &mut self.pubsubs {
            pubsub.url = expand(&pubsub.url, name)?;
        }

        Ok(())
    }

    /// Reject configurations that cannot produce usable pools or sockets
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.postgresql.dsn.trim().is_empty(),
            "postgresql.dsn must not be empty"
        );

        for domain in DataDomain::ALL {
            let storage = self.domain(domain);
            if storage.dsns().is_empty() {
                bail!("[{}] needs at least one connection string", domain);
            }
            ensure!(
                storage.replication_percentage <= 100,
                "[{}] replication_percentage must be between 0 and 100, got {}",
                domain,
                storage.replication_percentage
            );
            storage
                .cluster_overrides()
                .with_context(|| format!("[{}] has an invalid cluster override", domain))?;
        }

        ensure!(
            !self.message_bus.url.trim().is_empty(),
            "message_bus.url must not be empty"
        );
        ensure!(
            self.message_bus.receive_backoff_ms <= self.message_bus.receive_backoff_max_ms,
            "message_bus.receive_backoff_ms must not exceed receive_backoff_max_ms"
        );

        debug!(
            peers = self.message_bus.peers.len(),
            pubsubs = self.pubsubs.len(),
            "Configuration validated"
        );
        Ok(())
    }

    /// Address advertised to peers. A bare `:port` or a loopback/wildcard
    /// host is replaced by `hostname`.
    pub fn full_addr(&self, hostname: &str) -> String {
        if self.addr.starts_with(':') {
            return format!("{}{}", hostname, self.addr);
        }

        for local in ["localhost", "127.0.0.1", "0.0.0.0"] {
            if let Some(rest) = self.addr.strip_prefix(local) {
                return format!("{}{}", hostname, rest);
            }
        }
        self.addr.clone()
    }

    pub fn pubsub_urls(&self, mode: PubSubMode) -> Vec<(String, String)> {
        let mut urls: Vec<_> = self
            .pubsubs
            .iter()
            .filter(|(_, p)| p.mode == mode)
            .map(|(name, p)| (name.clone(), p.url.clone()))
            .collect();
        urls.sort();
        urls
    }
}

/// Convenience function to load, expand and validate configuration
pub fn load_config(path: &Path, environment: Option<&str>) -> Result<MasterConfig> {
    let mut config = MasterConfig::load(path, environment)?;
    config.expand_env_vars()?;
    config.validate()?;
    Ok(config)
}

/// Default configuration file location
pub fn default_config_path() -> PathBuf {
    PathBuf::from("config/master.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const BASE: &str = r#"
addr = ":55655"
log_level = "debug"

[postgresql]
dsn = "postgres://localhost:5432/resourced-master"

[hosts]
dsn = "postgres://localhost:5432/resourced-master-hosts"

[metrics]
dsns = ["postgres://db-1:5432/ts-metrics", "postgres://db-2:5432/ts-metrics"]
replication_percentage = 50

[metrics.dsn_by_cluster_id]
"7" = "postgres://db-7:5432/ts-metrics"

[metrics_aggr_15m]
dsn = "postgres://localhost:5432/ts-metrics-aggr-15m"

[events]
dsn = "postgres://localhost:5432/ts-events"

[logs]
dsn = "postgres://localhost:5432/ts-logs"
data_retention = 3

[checks]
dsn = "postgres://localhost:5432/ts-checks"

[executor_logs]
dsn = "postgres://localhost:5432/ts-executor-logs"

[message_bus]
url = "tcp://127.0.0.1:55755"
peers = ["tcp://10.0.0.2:55755"]

[pubsubs.metrics]
mode = "pub"
url = "tcp://127.0.0.1:55855"
"#;

    #[test]
    fn test_load_base_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("master.toml");
        fs::write(&config_path, BASE).unwrap();

        let config = MasterConfig::load(&config_path, None).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.metrics.dsns().len(), 2);
        assert_eq!(config.metrics.replication_percentage, 50);
        assert_eq!(config.hosts.replication_percentage, 100);
        assert_eq!(config.logs.data_retention, Some(3));
        assert_eq!(config.message_bus.peers.len(), 1);
        assert_eq!(config.pubsubs["metrics"].mode, PubSubMode::Pub);
        config.validate().unwrap();
    }

    #[test]
    fn test_environment_overlay() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("master.toml");
        fs::write(&config_path, BASE).unwrap();
        fs::create_dir(dir.path().join("environments")).unwrap();
        fs::write(
            dir.path().join("environments").join("staging.toml"),
            "log_level = \"warn\"\n",
        )
        .unwrap();

        let config = MasterConfig::load(&config_path, Some("staging")).unwrap();
        assert_eq!(config.log_level, "warn");

        // Missing overlays are not fatal
        let config = MasterConfig::load(&config_path, Some("nowhere")).unwrap();
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cluster_overrides_parse() {
        let config = MasterConfig::from_toml_str(BASE).unwrap();
        let overrides = config.metrics.cluster_overrides().unwrap();

        assert_eq!(
            overrides,
            vec![(ClusterId::new(7), "postgres://db-7:5432/ts-metrics".to_string())]
        );
    }

    #[test]
    fn test_validate_rejects_bad_storage() {
        let mut config = MasterConfig::from_toml_str(BASE).unwrap();
        config.events.dsn = None;
        assert!(config.validate().is_err());

        let mut config = MasterConfig::from_toml_str(BASE).unwrap();
        config.checks.replication_percentage = 101;
        assert!(config.validate().is_err());

        let mut config = MasterConfig::from_toml_str(BASE).unwrap();
        config
            .hosts
            .dsn_by_cluster_id
            .insert("not-a-number".to_string(), "postgres://x".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_env_vars_in_dsns() {
        std::env::set_var("RESOURCED_TEST_DB_HOST", "db.internal");
        let mut config = MasterConfig::from_toml_str(BASE).unwrap();
        config.hosts.dsn = Some("postgres://${RESOURCED_TEST_DB_HOST}:5432/hosts".to_string());

        config.expand_env_vars().unwrap();
        assert_eq!(config.hosts.dsns(), vec!["postgres://db.internal:5432/hosts"]);
    }

    #[test]
    fn test_full_addr() {
        let config = MasterConfig::from_toml_str(BASE).unwrap();
        assert_eq!(config.full_addr("master-1"), "master-1:55655");

        let mut config = config;
        config.addr = "0.0.0.0:55655".to_string();
        assert_eq!(config.full_addr("master-1"), "master-1:55655");
        config.addr = "db-02:55655".to_string();
        assert_eq!(config.full_addr("master-1"), "db-02:55655");
    }
}
