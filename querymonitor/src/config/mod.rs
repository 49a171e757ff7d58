//! Configuration for the query monitor.
//!
//! Settings are read from an INI file (`~/.querymonitor/config.ini` by
//! default). Every duration is a magnitude plus a unit:
//!
//! ```ini
//! [expiration]
//! idle_timeout = 15
//! idle_timeout_unit = minutes
//! ```
//!
//! A [`ConfigHandle`] carries the configuration in effect and can be reloaded
//! while the monitor runs.
//!
//! # Example
//!
//! ```
//! use querymonitor::config::{ConfigFile, TimedValue};
//!
//! let config = ConfigFile::from_ini_str("[monitor]\ninterval = 45\n").unwrap();
//! assert_eq!(config.monitor.interval, TimedValue::seconds(45));
//! ```

mod defaults;
mod file;
mod parser;
mod reload;
mod settings;
mod units;
mod writer;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use reload::{ConfigHandle, ConfigWatcher, DEFAULT_RELOAD_CHECK_INTERVAL};
pub use settings::{
    ConfigFile, ExecutorStatusSettings, ExpirationSettings, LoggingSettings, MonitorSettings,
};
pub use units::{format_duration, parse_duration, TimeUnit, TimedValue, UnitParseError};
