//! linepool line engine server
//!
//! Loads configuration, sets up logging and runs the periodic engine tasks
//! until Ctrl-C.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use linepool_line_engine::logging::{log_welcome, setup_logging};
use linepool_line_engine::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about = "Line allocation and operator queue engine", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "LINEPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the database URL
    #[arg(long)]
    database_url: Option<String>,

    /// Use the static probe and drop notifications instead of calling the provider
    #[arg(long)]
    offline: bool,

    /// Override the log level (e.g. debug, linepool_line_engine=trace)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration, print it and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = LineEngineConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(url) = args.database_url {
        config.database.database_url = url;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate().context("invalid configuration")?;

    if args.check_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    setup_logging(&config.logging)?;
    log_welcome("linepool", env!("CARGO_PKG_VERSION"));

    let mut builder = LineEngineServerBuilder::new().with_config(config);
    if args.offline {
        builder = builder.offline();
    }
    let mut server = builder.build().await.context("failed to build line engine")?;

    server.start().await?;
    info!("📞 Line engine running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;
    info!("🛑 Shutdown requested");

    server.stop().await?;
    server.engine().database().close().await;
    Ok(())
}
