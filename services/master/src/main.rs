//! ResourceD master entry point

use anyhow::{Context, Result};
use clap::Parser;
use master_config::{default_config_path, load_config};
use multidb::PgConnector;
use resourced_master::{logging, node, Master};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Environment overlay, loaded from `<config dir>/environments/<env>.toml`
    #[arg(short, long, env = "RESOURCED_ENV")]
    env: Option<String>,

    /// Hostname advertised to peers; resolved from the system when omitted
    #[arg(long)]
    hostname: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config, args.env.as_deref())
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    logging::init_tracing(&config.log_level, config.log_format)?;

    info!("Starting ResourceD master");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let hostname = args.hostname.unwrap_or_else(node::resolve_hostname);
    let master = Master::start(&PgConnector::new(), config, hostname).await?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C, shutting down");
        }
    };

    master.run_until(shutdown).await
}
