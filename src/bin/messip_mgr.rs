//! The manager binary: wires CLI flags, the legacy config file, and logging together, then
//! runs [`messip::manager::run`] until SIGINT.

use std::path::PathBuf;

use clap::Parser;
use messip::config::ManagerConfig;

/// `messip-mgr`: the central name-service and buffering process.
#[derive(Parser, Debug)]
#[clap(name = "messip-mgr", author, version, about = None)]
struct Cli {
    /// Control-link port (default 9200, or the legacy `/usr/etc/messip` file's second field).
    #[clap(short = 'p', long)]
    port: Option<u16>,

    /// Host/interface to bind (default: all interfaces).
    #[clap(short = 'h', long)]
    host: Option<String>,

    /// Optional directory for the bespoke per-date log files. Accepted for CLI compatibility
    /// with the legacy config file but unused by this crate's own `tracing` output.
    #[clap(short = 'l', long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = ManagerConfig::with_legacy_file_defaults();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if cli.log_dir.is_some() {
        config.log_dir = cli.log_dir;
    }

    messip::manager::run(config).await?;
    Ok(())
}
