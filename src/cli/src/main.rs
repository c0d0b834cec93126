//! Roam CLI - offline tooling for channel payloads and migration state.
//!
//! Decodes channel definitions, shows the replay order of migration state
//! files and simulates a state injection against in-memory containers.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{channel, config, simulate, state};
use output::OutputFormat;

/// Roam - event broker and live state migration tooling
#[derive(Parser)]
#[command(
    name = "roam",
    version = "0.1.0",
    about = "Roam - event broker and live state migration tooling",
    long_about = "Inspect channel payloads and migration state objects, and rehearse state injection offline.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Runtime configuration file (TOML)
    #[arg(short, long, global = true, env = "ROAM_CONFIG")]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode channel payloads and list them
    Channel(channel::ChannelArgs),

    /// Validate migration state objects and show their replay plans
    State(state::StateArgs),

    /// Inject state into in-memory containers and print the dispatch log
    Simulate(simulate::SimulateArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let settings = match config::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    };
    if let Err(e) = roam_core::telemetry::init_telemetry(&settings.logging) {
        output::print_error(&format!("{:#}", e));
    }

    let format = cli.output;
    let result = match cli.command {
        Commands::Channel(args) => channel::execute(args, format),
        Commands::State(args) => state::execute(args, &settings, format),
        Commands::Simulate(args) => simulate::execute(args, &settings, format).await,
        Commands::Config(cmd) => config::execute(cmd, &settings, cli.config.as_deref(), format),
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
