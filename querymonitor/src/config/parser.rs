//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module contains the `parse_ini()` function and its helpers.
//! It is the single place where INI key names are mapped to struct fields.

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use super::units::{parse_duration, TimeUnit, TimedValue};

/// Whether a zero magnitude is acceptable for a duration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zero {
    Allowed,
    Rejected,
}

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [monitor] section
    if let Some(section) = ini.section(Some("monitor")) {
        const S: &str = "monitor";
        if let Some(v) = section.get("scheduler_cadence") {
            let cadence = parse_duration(v).map_err(|e| invalid(S, "scheduler_cadence", v, e))?;
            if cadence.is_zero() {
                return Err(invalid(S, "scheduler_cadence", v, "must be greater than zero"));
            }
            config.monitor.scheduler_cadence = cadence;
        }
        let m = &mut config.monitor;
        m.interval = timed(section, S, "interval", m.interval, Zero::Rejected)?;
        m.lock_wait = timed(section, S, "lock_wait", m.lock_wait, Zero::Allowed)?;
        m.lock_lease = timed(section, S, "lock_lease", m.lock_lease, Zero::Rejected)?;
        m.inactive_query_ttl = timed(
            section,
            S,
            "inactive_query_ttl",
            m.inactive_query_ttl,
            Zero::Rejected,
        )?;
    }

    // [executor_status] section
    if let Some(section) = ini.section(Some("executor_status")) {
        const S: &str = "executor_status";
        let e = &mut config.executor_status;
        e.lock_wait = timed(section, S, "lock_wait", e.lock_wait, Zero::Allowed)?;
        e.lock_lease = timed(section, S, "lock_lease", e.lock_lease, Zero::Rejected)?;
        if let Some(v) = section.get("default_connection_pool") {
            let v = v.trim();
            if v.is_empty() {
                return Err(invalid(S, "default_connection_pool", v, "must not be empty"));
            }
            e.default_connection_pool = v.to_string();
        }
    }

    // [expiration] section
    if let Some(section) = ini.section(Some("expiration")) {
        const S: &str = "expiration";
        let x = &mut config.expiration;
        x.idle_timeout = timed(section, S, "idle_timeout", x.idle_timeout, Zero::Rejected)?;
        x.progress_timeout = timed(
            section,
            S,
            "progress_timeout",
            x.progress_timeout,
            Zero::Rejected,
        )?;
        x.call_timeout = timed(section, S, "call_timeout", x.call_timeout, Zero::Rejected)?;
        x.call_timeout_interval = timed(
            section,
            S,
            "call_timeout_interval",
            x.call_timeout_interval,
            Zero::Rejected,
        )?;
        x.page_min_timeout = timed(
            section,
            S,
            "page_min_timeout",
            x.page_min_timeout,
            Zero::Rejected,
        )?;
        x.page_max_timeout = timed(
            section,
            S,
            "page_max_timeout",
            x.page_max_timeout,
            Zero::Rejected,
        )?;
        x.short_circuit_check_time = optional_timed(section, S, "short_circuit_check_time")?;
        x.short_circuit_timeout = optional_timed(section, S, "short_circuit_timeout")?;
        x.long_running_query_timeout = optional_timed(section, S, "long_running_query_timeout")?;
        if let Some(v) = section.get("max_long_running_timeout_retries") {
            x.max_long_running_timeout_retries = v.trim().parse().map_err(|_| {
                invalid(
                    S,
                    "max_long_running_timeout_retries",
                    v,
                    "must be a non-negative integer",
                )
            })?;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = v.into();
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
    }

    Ok(config)
}

/// Read `<key>` and `<key>_unit`, overlaying whichever is present onto `current`.
fn timed(
    section: &Properties,
    section_name: &str,
    key: &str,
    current: TimedValue,
    zero: Zero,
) -> Result<TimedValue, ConfigFileError> {
    let unit_key = format!("{}_unit", key);
    let mut value = current;

    if let Some(v) = section.get(key) {
        value.magnitude = parse_magnitude(section_name, key, v)?;
        if zero == Zero::Rejected && value.magnitude == 0 {
            return Err(invalid(section_name, key, v, "must be greater than zero"));
        }
    }
    if let Some(v) = section.get(unit_key.as_str()) {
        value.unit = v
            .parse::<TimeUnit>()
            .map_err(|e| invalid(section_name, &unit_key, v, e))?;
    }

    Ok(value)
}

/// Like [`timed`] for thresholds that are derived when absent.
///
/// A unit without a magnitude is an error: there is nothing to attach it to.
fn optional_timed(
    section: &Properties,
    section_name: &str,
    key: &str,
) -> Result<Option<TimedValue>, ConfigFileError> {
    let unit_key = format!("{}_unit", key);
    let magnitude = section.get(key).filter(|v| !v.trim().is_empty());

    match (magnitude, section.get(unit_key.as_str())) {
        (None, None) => Ok(None),
        (None, Some(v)) => Err(invalid(
            section_name,
            &unit_key,
            v,
            &format!("'{}' must be set when '{}' is given", key, unit_key),
        )),
        (Some(_), _) => {
            // The unit defaults to minutes, the unit of every expiration default.
            timed(
                section,
                section_name,
                key,
                TimedValue::minutes(0),
                Zero::Rejected,
            )
            .map(Some)
        }
    }
}

fn parse_magnitude(section: &str, key: &str, v: &str) -> Result<u64, ConfigFileError> {
    v.trim()
        .parse()
        .map_err(|_| invalid(section, key, v, "must be a non-negative integer"))
}

fn invalid(
    section: &str,
    key: &str,
    value: &str,
    reason: impl std::fmt::Display,
) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(text: &str) -> Result<ConfigFile, ConfigFileError> {
        let ini = Ini::load_from_str(text).unwrap();
        parse_ini(&ini)
    }

    #[test]
    fn empty_ini_gives_defaults() {
        assert_eq!(parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn monitor_section_overlays_defaults() {
        let config = parse(
            "[monitor]\n\
             scheduler_cadence = 10s\n\
             interval = 2\n\
             interval_unit = minutes\n\
             lock_wait = 250\n\
             inactive_query_ttl = 12\n\
             inactive_query_ttl_unit = hours\n",
        )
        .unwrap();

        assert_eq!(config.monitor.scheduler_cadence, Duration::from_secs(10));
        assert_eq!(config.monitor.interval, TimedValue::minutes(2));
        // Unit not given: default unit (milliseconds) is kept.
        assert_eq!(config.monitor.lock_wait, TimedValue::millis(250));
        assert_eq!(config.monitor.inactive_query_ttl, TimedValue::hours(12));
    }

    #[test]
    fn unit_only_changes_effective_duration() {
        let config = parse("[expiration]\nidle_timeout_unit = seconds\n").unwrap();
        assert_eq!(config.expiration.idle_timeout, TimedValue::seconds(15));
        assert_eq!(config.expiration.idle_timeout.as_millis(), 15_000);
    }

    #[test]
    fn zero_lock_wait_is_allowed_but_zero_timeout_is_not() {
        assert!(parse("[executor_status]\nlock_wait = 0\n").is_ok());

        let err = parse("[expiration]\nprogress_timeout = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref key, .. } if key == "progress_timeout"
        ));
    }

    #[test]
    fn unknown_unit_is_rejected() {
        let err = parse("[monitor]\ninterval_unit = weeks\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref key, .. } if key == "interval_unit"
        ));
    }

    #[test]
    fn bad_cadence_is_rejected() {
        assert!(parse("[monitor]\nscheduler_cadence = often\n").is_err());
        assert!(parse("[monitor]\nscheduler_cadence = 0s\n").is_err());
    }

    #[test]
    fn derived_thresholds_are_optional() {
        let config = parse("[expiration]\ncall_timeout = 10\n").unwrap();
        assert_eq!(config.expiration.call_timeout, TimedValue::minutes(10));
        assert!(config.expiration.short_circuit_timeout.is_none());

        let config = parse(
            "[expiration]\n\
             short_circuit_timeout = 500\n\
             short_circuit_timeout_unit = seconds\n\
             long_running_query_timeout = 3\n",
        )
        .unwrap();
        assert_eq!(
            config.expiration.short_circuit_timeout,
            Some(TimedValue::seconds(500))
        );
        assert_eq!(
            config.expiration.long_running_query_timeout,
            Some(TimedValue::minutes(3))
        );
    }

    #[test]
    fn unit_without_magnitude_for_derived_threshold_is_rejected() {
        let err = parse("[expiration]\nshort_circuit_timeout_unit = seconds\n").unwrap_err();
        assert!(matches!(err, ConfigFileError::InvalidValue { .. }));
    }

    #[test]
    fn empty_default_connection_pool_is_rejected() {
        assert!(parse("[executor_status]\ndefault_connection_pool = \n").is_err());

        let config = parse("[executor_status]\ndefault_connection_pool = WAREHOUSE\n").unwrap();
        assert_eq!(config.executor_status.default_connection_pool, "WAREHOUSE");
    }

    #[test]
    fn retries_must_be_numeric() {
        assert!(parse("[expiration]\nmax_long_running_timeout_retries = many\n").is_err());
        let config = parse("[expiration]\nmax_long_running_timeout_retries = 0\n").unwrap();
        assert_eq!(config.expiration.max_long_running_timeout_retries, 0);
    }
}
