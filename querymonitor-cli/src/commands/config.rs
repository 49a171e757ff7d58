//! Configuration management CLI commands.
//!
//! Provides `config path`, `config show` and `config init`.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use querymonitor::config::{config_file_path, ConfigFile};

use super::load_config;
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the default configuration file path
    Path,

    /// Print the effective settings
    ///
    /// Settings missing from the file are shown with their defaults.
    Show {
        /// Path to config.ini (defaults to ~/.querymonitor/config.ini)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Write a configuration file containing the defaults
    Init {
        /// Path to config.ini (defaults to ~/.querymonitor/config.ini)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => run_path(),
        ConfigCommands::Show { config } => run_show(config.as_deref()),
        ConfigCommands::Init { config, force } => {
            let path = config.unwrap_or_else(config_file_path);
            run_init(&path, force)
        }
    }
}

/// Show the configuration file path.
fn run_path() -> Result<(), CliError> {
    println!("{}", config_file_path().display());
    Ok(())
}

/// Print the effective configuration as INI.
fn run_show(path: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(path)?;
    print!("{}", config.to_config_string());
    Ok(())
}

/// Write the default configuration.
fn run_init(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::AlreadyExists(path.to_path_buf()));
    }

    ConfigFile::default().save_to(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
