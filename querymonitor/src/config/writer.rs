//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;
use super::units::{format_duration, TimedValue};

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let m = &config.monitor;
    let e = &config.executor_status;
    let x = &config.expiration;

    format!(
        r#"; Durations are written as a magnitude plus a unit.
; Units: milliseconds, seconds, minutes, hours, days

[monitor]
; How often each instance wakes up (e.g. 30s, 500ms, 5m)
scheduler_cadence = {}
; Minimum time between fleet-wide sweeps; a local sweep older than this is abandoned
{}
; Wait for the fleet lock (0 = fail fast)
{}
; Fleet lock lease; the lock frees itself after this even if the holder dies
{}
; Non-running queries with no interaction for this long are deleted
{}

[executor_status]
; Wait for a pool status lock
{}
; Pool status lock lease
{}
; Connection pool counted for queries that do not name one
default_connection_pool = {}

[expiration]
; Running query with no client interaction for this long is cancelled
{}
; Running query with no progress for this long is nudged
{}
{}
{}
{}
{}
; Derived from call_timeout when left empty:
;   short_circuit_check_time   = call_timeout / 2
;   short_circuit_timeout      = round(0.97 * call_timeout)
;   long_running_query_timeout = (max_long_running_timeout_retries + 1) * call_timeout
{}
{}
{}
max_long_running_timeout_retries = {}

[logging]
directory = {}
file = {}
"#,
        format_duration(m.scheduler_cadence),
        timed_lines("interval", &m.interval),
        timed_lines("lock_wait", &m.lock_wait),
        timed_lines("lock_lease", &m.lock_lease),
        timed_lines("inactive_query_ttl", &m.inactive_query_ttl),
        timed_lines("lock_wait", &e.lock_wait),
        timed_lines("lock_lease", &e.lock_lease),
        e.default_connection_pool,
        timed_lines("idle_timeout", &x.idle_timeout),
        timed_lines("progress_timeout", &x.progress_timeout),
        timed_lines("call_timeout", &x.call_timeout),
        timed_lines("call_timeout_interval", &x.call_timeout_interval),
        timed_lines("page_min_timeout", &x.page_min_timeout),
        timed_lines("page_max_timeout", &x.page_max_timeout),
        optional_lines("short_circuit_check_time", x.short_circuit_check_time.as_ref()),
        optional_lines("short_circuit_timeout", x.short_circuit_timeout.as_ref()),
        optional_lines(
            "long_running_query_timeout",
            x.long_running_query_timeout.as_ref()
        ),
        x.max_long_running_timeout_retries,
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

fn timed_lines(key: &str, value: &TimedValue) -> String {
    format!(
        "{key} = {}\n{key}_unit = {}",
        value.magnitude,
        value.unit.as_str()
    )
}

fn optional_lines(key: &str, value: Option<&TimedValue>) -> String {
    match value {
        Some(v) => timed_lines(key, v),
        None => format!("{key} =\n;{key}_unit = minutes"),
    }
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
