//! CLI entry point for the quoteboard bot.
//!
//! Provides the `quoteboard` command with subcommands for running the bot
//! and checking local state.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod run;
mod scheduled;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// quoteboard — per-guild quote board bot.
#[derive(Parser)]
#[command(
    name = "quoteboard",
    version,
    about = "quoteboard — per-guild quote board bot",
    long_about = "Saves quotes from bookmark reactions, serves them back by number, \
                  author, or at random, and snapshots everything to disk."
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config/default.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the chat platform and serve quotes.
    Run,

    /// Show local state: config, snapshot file, credentials.
    Status,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            init_tracing("info");
            run::run(&cli.config).await
        }
        Commands::Status => {
            init_tracing("warn");
            run::status(&cli.config);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
