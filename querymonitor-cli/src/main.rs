//! Query Monitor CLI - Command-line interface
//!
//! Inspect and initialise the monitor configuration, print the derived
//! expiration policy, or run a local fleet simulation.

mod commands;
mod error;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::simulate::SimulateArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "querymonitor")]
#[command(version = querymonitor::VERSION)]
#[command(about = "Fleet-wide timeout watchdog for long-running queries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or initialise the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Print the expiration thresholds derived from the configuration
    Policy {
        /// Path to config.ini (defaults to ~/.querymonitor/config.ini)
        #[arg(long)]
        config: Option<std::path::PathBuf>,
    },

    /// Run several monitor instances against an in-memory fleet
    Simulate(SimulateArgs),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Config(command) => commands::config::run(command),
        Commands::Policy { config } => commands::policy::run(config.as_deref()),
        Commands::Simulate(args) => commands::simulate::run(args),
    };

    if let Err(e) = result {
        e.exit();
    }
}
