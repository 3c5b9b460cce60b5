use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chime", about = "Timezone-aware recurring alarm scheduler")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration file and exit without starting the daemon
    Validate,

    /// Clear the in-memory view (no-op without a running daemon, kept for
    /// symmetry with the admin API's `/reload`) and rebuild it from the store
    Reload,
}
