//! Feedstream binary.
//!
//! Command-line entry point to the feed data engine: create feeds, post and
//! sync samples, and read them back through the query pipeline.

use clap::Parser;
use feedstream_core::cli::{self, Commands};
use feedstream_core::config::{Args, ServiceConfig};
use feedstream_core::logging;
use tracing::{debug, error};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub args: Args,

    #[command(subcommand)]
    pub command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServiceConfig::load(&cli.args)?;
    let _guard = logging::init(&config.logging)?;
    debug!("Loaded configuration: {:?}", config);

    if let Err(e) = cli::run(cli.command, config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
