mod bus;
mod cli;
mod config;
mod daemon;
mod days;
mod db;
mod error;
mod model;
mod notifier;
mod processor;
mod scheduler;
mod server;
mod store;
mod time_index;
mod timeconv;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::config::{load_config, validate_config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.chime.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(config_path = %cli.config.display(), "config loaded");

    validate_config(&config).context("config validation failed")?;
    info!("config validated successfully");

    match cli.command {
        Some(Commands::Validate) => {
            println!("Configuration is valid.");
        }
        Some(Commands::Reload) => {
            let pool = db::create_pool(&config).await.context("creating database")?;
            let scheduler = scheduler::Scheduler::new(pool);
            scheduler.reload().await.context("reloading alarms from store")?;
            println!("Reloaded {} alarms from the store.", scheduler.count());
        }
        None => {
            daemon::run(config).await?;
        }
    }

    Ok(())
}
