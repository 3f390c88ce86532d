//! Game server sidecar
//!
//! Starts the game server, tells the platform when it is ready, relays its
//! health and shuts it down cleanly on SIGTERM.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

mod commands;

#[derive(Parser)]
#[command(name = "game-sidecar")]
#[command(about = "Supervises a game server and reports its lifecycle to Agones")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "sidecar.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Fail on unset environment variables in the configuration
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the game server until it exits or a termination signal arrives
    Run,

    /// Run the health check once
    Health,

    /// Validate the configuration file
    Validate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    smol::block_on(async {
        match cli.command {
            Commands::Run => commands::run::run(&cli.config, cli.strict).await,
            Commands::Health => commands::health::run(&cli.config, cli.strict).await,
            Commands::Validate => commands::validate::run(&cli.config, cli.strict).await,
        }
    })
}
