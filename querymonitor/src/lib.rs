//! querymonitor - fleet-wide timeout watchdog for long-running queries
//!
//! A fleet of stateless service instances shares a pool of in-flight query
//! executions. This library polices them: it decides when a query is
//! stalled, idle or abandoned and triggers the matching action, while
//! making sure only one instance in the fleet sweeps per interval.
//!
//! # High-Level API
//!
//! The [`monitor`] module holds the scheduler that ties everything together:
//!
//! ```ignore
//! use querymonitor::config::{ConfigFile, ConfigHandle};
//! use querymonitor::monitor::MonitorScheduler;
//!
//! let config = ConfigHandle::new(ConfigFile::load()?);
//! let scheduler = MonitorScheduler::new(config, status_cache, executor_status, collaborators)?;
//! tokio::spawn(scheduler.run(shutdown));
//! ```
//!
//! The shared cache, lock service and query service are reached through
//! traits ([`cache::RecordStore`], [`cache::LockService`],
//! [`query::QueryStatusStore`], ...). In-memory implementations of each are
//! included for tests and local simulation.

pub mod cache;
pub mod config;
pub mod executor_status;
pub mod expiration;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod query;
pub mod time;

/// Version of the querymonitor library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
