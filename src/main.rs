//! FABRIC Ceph Manager
//!
//! Usage:
//! - Default config: `fabric-ceph`
//! - Custom config: `fabric-ceph --config /path/to/config.yml`
//! - Override ports: `fabric-ceph --port 11000 --metrics-port 8700`
//!
//! The container entrypoint passes a legacy positional `fabric_ceph`
//! argument, which is accepted and ignored.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use fabric_ceph::config::{constants, Config};

#[derive(Debug, Parser)]
#[command(name = "fabric-ceph", version, about = "FABRIC CephX user manager")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "FABRIC_CEPH_CONFIG", default_value = constants::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override `runtime.port`
    #[arg(long)]
    port: Option<u16>,

    /// Override `runtime.metrics-port`
    #[arg(long)]
    metrics_port: Option<u16>,

    #[arg(hide = true)]
    legacy: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        config.runtime.port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.runtime.metrics_port = port;
    }

    let _guards = fabric_ceph::logging::init(&config.logging).context("failed to init logging")?;
    if let Some(arg) = cli.legacy.as_deref() {
        tracing::debug!(arg = %arg, "Ignoring legacy positional argument");
    }

    fabric_ceph::run(config).await
}
