//! Hot-reloadable configuration.
//!
//! [`ConfigHandle`] publishes the current [`ConfigFile`] through a
//! `tokio::sync::watch` channel. Readers take a cheap `Arc` snapshot with
//! [`ConfigHandle::current`] at the start of each unit of work, so a reload
//! never changes settings halfway through a tick.
//!
//! [`ConfigWatcher`] is a background daemon that polls the config file's
//! modification time and reloads it when it changes. A file that fails to
//! parse or validate is logged and ignored; the last good configuration
//! stays in effect.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::file::{ConfigFile, ConfigFileError};

/// Default interval between config file modification checks.
pub const DEFAULT_RELOAD_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Shared, reloadable configuration.
///
/// Cloning is cheap; all clones observe the same configuration.
#[derive(Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<Arc<ConfigFile>>>,
}

impl ConfigHandle {
    /// Creates a handle holding the given configuration.
    pub fn new(config: ConfigFile) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(config));
        Self { tx: Arc::new(tx) }
    }

    /// Returns the configuration currently in effect.
    pub fn current(&self) -> Arc<ConfigFile> {
        Arc::clone(&self.tx.borrow())
    }

    /// Subscribes to configuration changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigFile>> {
        self.tx.subscribe()
    }

    /// Replaces the configuration and notifies subscribers.
    pub fn replace(&self, config: ConfigFile) {
        self.tx.send_replace(Arc::new(config));
    }

    /// Re-reads the configuration from `path`.
    ///
    /// Returns `Ok(true)` if a different configuration was published,
    /// `Ok(false)` if the file parsed to the configuration already in effect.
    /// On error the current configuration is left untouched.
    pub fn reload_from(&self, path: &Path) -> Result<bool, ConfigFileError> {
        let config = ConfigFile::load_from(path)?;
        let changed = *self.current() != config;
        if changed {
            self.replace(config);
        }
        Ok(changed)
    }
}

impl std::fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigHandle")
            .field("current", &*self.current())
            .finish()
    }
}

/// Background daemon that reloads the config file when it changes on disk.
pub struct ConfigWatcher {
    handle: ConfigHandle,
    path: PathBuf,
    check_interval: Duration,
}

impl ConfigWatcher {
    /// Creates a watcher for `path` publishing into `handle`.
    pub fn new(handle: ConfigHandle, path: impl Into<PathBuf>) -> Self {
        Self {
            handle,
            path: path.into(),
            check_interval: DEFAULT_RELOAD_CHECK_INTERVAL,
        }
    }

    /// Sets a custom check interval.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Runs until shutdown is signalled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            path = %self.path.display(),
            check_interval_ms = self.check_interval.as_millis() as u64,
            "Config watcher starting"
        );

        let mut last_modified = modified_time(&self.path);
        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Config watcher shutting down");
                    break;
                }

                _ = interval.tick() => {
                    let modified = modified_time(&self.path);
                    if modified == last_modified {
                        continue;
                    }
                    last_modified = modified;
                    self.reload();
                }
            }
        }
    }

    fn reload(&self) {
        match self.handle.reload_from(&self.path) {
            Ok(true) => info!(path = %self.path.display(), "Configuration reloaded"),
            Ok(false) => debug!(path = %self.path.display(), "Config file touched, no changes"),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Config reload failed, keeping previous configuration"
            ),
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimedValue;
    use tempfile::TempDir;

    #[test]
    fn current_returns_initial_config() {
        let handle = ConfigHandle::new(ConfigFile::default());
        assert_eq!(*handle.current(), ConfigFile::default());
    }

    #[test]
    fn reload_publishes_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        let handle = ConfigHandle::new(ConfigFile::default());
        let mut rx = handle.subscribe();

        std::fs::write(&path, "[monitor]\ninterval = 90\n").unwrap();
        assert!(handle.reload_from(&path).unwrap());
        assert_eq!(handle.current().monitor.interval, TimedValue::seconds(90));
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();

        // Same content: nothing published
        assert!(!handle.reload_from(&path).unwrap());
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn failed_reload_keeps_previous_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        let handle = ConfigHandle::new(ConfigFile::default());

        std::fs::write(&path, "[expiration]\nidle_timeout = 0\n").unwrap();
        assert!(handle.reload_from(&path).is_err());
        assert_eq!(*handle.current(), ConfigFile::default());
    }

    #[test]
    fn clones_share_configuration() {
        let handle = ConfigHandle::new(ConfigFile::default());
        let other = handle.clone();

        let mut config = ConfigFile::default();
        config.monitor.lock_wait = TimedValue::millis(5);
        other.replace(config);

        assert_eq!(handle.current().monitor.lock_wait, TimedValue::millis(5));
    }

    #[tokio::test]
    async fn watcher_picks_up_file_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        let handle = ConfigHandle::new(ConfigFile::default());

        let shutdown = CancellationToken::new();
        let watcher = ConfigWatcher::new(handle.clone(), &path)
            .with_check_interval(Duration::from_millis(20));
        let task = tokio::spawn(watcher.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        std::fs::write(&path, "[monitor]\nlock_wait = 7\n").unwrap();

        let mut reloaded = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if handle.current().monitor.lock_wait == TimedValue::millis(7) {
                reloaded = true;
                break;
            }
        }

        shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(reloaded, "watcher should have reloaded the new file");
    }

    #[tokio::test]
    async fn watcher_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let handle = ConfigHandle::new(ConfigFile::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let watcher = ConfigWatcher::new(handle, dir.path().join("missing.ini"))
            .with_check_interval(Duration::from_millis(10));
        let result = tokio::time::timeout(Duration::from_millis(500), watcher.run(shutdown)).await;
        assert!(result.is_ok());
    }
}
