//! Session hub daemon.

use std::path::PathBuf;

use clap::Parser;
use log::error;

use curvelab_hub::HubConfig;

#[derive(Debug, Parser)]
#[command(name = "curvelab-hub", about = "Session hub for collaborative curve editing")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match HubConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{e}");
                std::process::exit(1);
            }
        },
        None => HubConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }

    if let Err(e) = curvelab_hub::run(config).await {
        error!("hub terminated: {e}");
        std::process::exit(1);
    }
}
