//! Relay server binary.

use std::path::PathBuf;

use clap::Parser;
use relay_server::settings::RelaySettings;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Presence-and-fanout coordination server for Relay chat.
#[derive(Debug, Parser)]
#[command(name = "relay", version)]
struct Cli {
    /// Path to a `relay.json` config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config and `RELAY_HOST`).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides config and `RELAY_PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path (overrides config and `RELAY_DB_PATH`).
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = RelaySettings::load(cli.config.as_deref());
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(db_path) = cli.db_path {
        settings.storage.db_path = db_path;
    }

    relay_server::run(settings).await
}
