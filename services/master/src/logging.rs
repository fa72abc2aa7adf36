//! Tracing setup for the master binary

use anyhow::{anyhow, Result};
use master_config::LogFormat;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `RUST_LOG` when set, otherwise the configured level
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

pub fn init_tracing(log_level: &str, format: LogFormat) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(log_level));

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
    .map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
