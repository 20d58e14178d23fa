#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::Parser;

/// Persistent, prioritised outbound mail queue
#[derive(Parser, Debug)]
#[command(name = "herald", version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to $HERALD_CONFIG, ./herald.config.ron,
    /// then /etc/herald/herald.config.ron)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = herald::config::find_config_file(cli.config)?;
    let herald = herald::config::load(&config_path)?;

    herald.run().await
}
