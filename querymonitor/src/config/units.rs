//! Time units and magnitude-plus-unit durations.
//!
//! Every configurable threshold is stored the way operators write it: a
//! magnitude and a unit. Comparisons always go through
//! [`TimedValue::as_millis`], so changing `idle_timeout_unit` from `minutes`
//! to `seconds` without touching `idle_timeout` shortens the timeout by a
//! factor of sixty. That is the intended behavior.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error parsing a time unit or duration expression.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitParseError {
    /// Unrecognised unit name.
    #[error("Unknown time unit '{0}' - expected one of: milliseconds, seconds, minutes, hours, days")]
    UnknownUnit(String),

    /// Duration expression could not be parsed.
    #[error("Invalid duration '{0}' - expected format like '30s', '500ms', '5m', '1h' or '1d'")]
    InvalidDuration(String),
}

/// Unit of a configured duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Milliseconds in one unit.
    pub const fn millis_per_unit(self) -> u64 {
        match self {
            TimeUnit::Milliseconds => 1,
            TimeUnit::Seconds => 1_000,
            TimeUnit::Minutes => 60_000,
            TimeUnit::Hours => 3_600_000,
            TimeUnit::Days => 86_400_000,
        }
    }

    /// Canonical lowercase name, as written to config files.
    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Milliseconds => "milliseconds",
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
        }
    }

    /// Short suffix used in duration expressions.
    pub fn suffix(self) -> &'static str {
        match self {
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "m",
            TimeUnit::Hours => "h",
            TimeUnit::Days => "d",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = UnitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ms" | "millis" | "millisecond" | "milliseconds" => Ok(TimeUnit::Milliseconds),
            "s" | "sec" | "secs" | "second" | "seconds" => Ok(TimeUnit::Seconds),
            "m" | "min" | "mins" | "minute" | "minutes" => Ok(TimeUnit::Minutes),
            "h" | "hr" | "hrs" | "hour" | "hours" => Ok(TimeUnit::Hours),
            "d" | "day" | "days" => Ok(TimeUnit::Days),
            _ => Err(UnitParseError::UnknownUnit(s.trim().to_string())),
        }
    }
}

/// A duration expressed as a magnitude in some unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimedValue {
    pub magnitude: u64,
    pub unit: TimeUnit,
}

impl TimedValue {
    pub const fn new(magnitude: u64, unit: TimeUnit) -> Self {
        Self { magnitude, unit }
    }

    pub const fn millis(magnitude: u64) -> Self {
        Self::new(magnitude, TimeUnit::Milliseconds)
    }

    pub const fn seconds(magnitude: u64) -> Self {
        Self::new(magnitude, TimeUnit::Seconds)
    }

    pub const fn minutes(magnitude: u64) -> Self {
        Self::new(magnitude, TimeUnit::Minutes)
    }

    pub const fn hours(magnitude: u64) -> Self {
        Self::new(magnitude, TimeUnit::Hours)
    }

    pub const fn days(magnitude: u64) -> Self {
        Self::new(magnitude, TimeUnit::Days)
    }

    /// Normalised length in milliseconds (saturating).
    pub fn as_millis(&self) -> u64 {
        self.magnitude.saturating_mul(self.unit.millis_per_unit())
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.as_millis())
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude == 0
    }

    /// Same unit, magnitude replaced.
    pub fn with_magnitude(&self, magnitude: u64) -> Self {
        Self::new(magnitude, self.unit)
    }
}

impl fmt::Display for TimedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.magnitude, self.unit)
    }
}

/// Parse a compact duration expression such as `30s`, `500ms` or `5m`.
///
/// A bare number is read as seconds.
///
/// ```
/// use querymonitor::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
/// assert_eq!(parse_duration("250 ms").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
/// assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, UnitParseError> {
    let trimmed = s.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (num_part, unit_part) = trimmed.split_at(split);

    let magnitude: u64 = num_part
        .parse()
        .map_err(|_| UnitParseError::InvalidDuration(trimmed.to_string()))?;

    let unit = if unit_part.trim().is_empty() {
        TimeUnit::Seconds
    } else {
        unit_part
            .parse::<TimeUnit>()
            .map_err(|_| UnitParseError::InvalidDuration(trimmed.to_string()))?
    };

    Ok(TimedValue::new(magnitude, unit).as_duration())
}

/// Format a duration using the largest unit that divides it evenly.
///
/// ```
/// use querymonitor::config::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_secs(30)), "30s");
/// assert_eq!(format_duration(Duration::from_secs(300)), "5m");
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis() as u64;
    if ms == 0 {
        return "0s".to_string();
    }
    let unit = [
        TimeUnit::Days,
        TimeUnit::Hours,
        TimeUnit::Minutes,
        TimeUnit::Seconds,
    ]
    .into_iter()
    .find(|u| ms % u.millis_per_unit() == 0)
    .unwrap_or(TimeUnit::Milliseconds);

    format!("{}{}", ms / unit.millis_per_unit(), unit.suffix())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unit_aliases_parse() {
        assert_eq!("ms".parse::<TimeUnit>().unwrap(), TimeUnit::Milliseconds);
        assert_eq!("Seconds".parse::<TimeUnit>().unwrap(), TimeUnit::Seconds);
        assert_eq!(" minutes ".parse::<TimeUnit>().unwrap(), TimeUnit::Minutes);
        assert_eq!("h".parse::<TimeUnit>().unwrap(), TimeUnit::Hours);
        assert_eq!("DAYS".parse::<TimeUnit>().unwrap(), TimeUnit::Days);
    }

    #[test]
    fn unknown_unit_is_rejected() {
        let err = "fortnights".parse::<TimeUnit>().unwrap_err();
        assert_eq!(err, UnitParseError::UnknownUnit("fortnights".to_string()));
    }

    #[test]
    fn changing_unit_changes_effective_duration() {
        let idle = TimedValue::minutes(15);
        assert_eq!(idle.as_millis(), 900_000);

        let same_magnitude = TimedValue::new(15, TimeUnit::Seconds);
        assert_eq!(same_magnitude.as_millis(), 15_000);
    }

    #[test]
    fn as_millis_saturates() {
        let huge = TimedValue::days(u64::MAX);
        assert_eq!(huge.as_millis(), u64::MAX);
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("s30").is_err());
        assert!(parse_duration("30 parsecs").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn display_includes_unit() {
        assert_eq!(TimedValue::hours(2).to_string(), "2 hours");
    }

    proptest! {
        #[test]
        fn format_then_parse_preserves_duration(ms in 0u64..10_000_000_000) {
            let duration = Duration::from_millis(ms);
            let text = format_duration(duration);
            prop_assert_eq!(parse_duration(&text).unwrap(), duration);
        }

        #[test]
        fn millis_scale_with_unit(magnitude in 0u64..1_000_000) {
            prop_assert_eq!(TimedValue::seconds(magnitude).as_millis(), magnitude * 1_000);
            prop_assert_eq!(TimedValue::minutes(magnitude).as_millis(), magnitude * 60_000);
            prop_assert_eq!(TimedValue::days(magnitude).as_millis(), magnitude * 86_400_000);
        }
    }
}
