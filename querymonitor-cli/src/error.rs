//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::path::PathBuf;
use std::process;

use querymonitor::config::ConfigFileError;
use querymonitor::expiration::PolicyError;
use querymonitor::monitor::MonitorError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(std::io::Error),
    /// Configuration file could not be read or written
    Config(ConfigFileError),
    /// Expiration thresholds are inconsistent
    Policy(PolicyError),
    /// Refused to overwrite an existing file
    AlreadyExists(PathBuf),
    /// Invalid command-line argument
    InvalidArgument(String),
    /// Failed to build or run the simulated fleet
    Simulation(MonitorError),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// Failed to serialize command output
    Output(serde_json::Error),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::AlreadyExists(_) => {
                eprintln!();
                eprintln!("Use --force to overwrite it with the defaults.");
            }
            CliError::Config(ConfigFileError::InvalidValue { .. }) | CliError::Policy(_) => {
                eprintln!();
                eprintln!("Run 'querymonitor config init --force' to restore the defaults,");
                eprintln!("or fix the setting named above.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Policy(e) => write!(f, "Invalid expiration policy: {}", e),
            CliError::AlreadyExists(path) => {
                write!(f, "Config file already exists: {}", path.display())
            }
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Simulation(e) => write!(f, "Simulation failed: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start async runtime: {}", e),
            CliError::Output(e) => write!(f, "Failed to format output: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::Policy(e) => Some(e),
            CliError::Simulation(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            CliError::Output(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<PolicyError> for CliError {
    fn from(e: PolicyError) -> Self {
        CliError::Policy(e)
    }
}

impl From<MonitorError> for CliError {
    fn from(e: MonitorError) -> Self {
        CliError::Simulation(e)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Output(e)
    }
}
