//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`config`] - Configuration management (path, show, init)
//! - [`policy`] - Derived expiration thresholds
//! - [`simulate`] - Local fleet simulation

pub mod config;
pub mod policy;
pub mod simulate;

use std::path::Path;

use querymonitor::config::{ConfigFile, ConfigFileError};

/// Load the configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, ConfigFileError> {
    match path {
        Some(path) => ConfigFile::load_from(path),
        None => ConfigFile::load(),
    }
}
