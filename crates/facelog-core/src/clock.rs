//! Wall-clock source and event timestamp rendering.
//!
//! Debounce decisions compare `DateTime<Utc>` instants; time zones only
//! matter when an instant is rendered for storage.

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeDelta, TimeZone, Utc};
use std::cell::Cell;
use std::time::Instant;
use thiserror::Error;

const LOCAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FIXED_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

#[derive(Error, Debug)]
pub enum TimestampError {
    #[error("unparseable timestamp {0:?}")]
    Unparseable(String),
    #[error("local time {0} does not exist in the host time zone")]
    NonexistentLocalTime(NaiveDateTime),
    #[error("invalid UTC offset {0:?} (expected e.g. +05:30)")]
    InvalidOffset(String),
}

/// Source of "now" for the debounced logger.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time read once at construction, advanced by a monotonic
/// [`Instant`]. Steps of the host clock (NTP corrections) after startup do
/// not move it backwards.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    wall_start: DateTime<Utc>,
    mono_start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            wall_start: Utc::now(),
            mono_start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.mono_start.elapsed();
        self.wall_start + TimeDelta::microseconds(elapsed.as_micros() as i64)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.now.set(now);
    }

    pub fn advance(&self, by: TimeDelta) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// How persisted timestamps are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    /// `YYYY-MM-DD HH:MM:SS` in the host time zone, no offset suffix.
    #[default]
    Local,
    /// `YYYY-MM-DD HH:MM:SS+HH:MM` in a fixed offset.
    Fixed(FixedOffset),
}

impl TimestampFormat {
    /// Parse an offset such as `+05:30` or `-08:00`.
    pub fn from_offset_str(s: &str) -> Result<Self, TimestampError> {
        s.trim()
            .parse::<FixedOffset>()
            .map(Self::Fixed)
            .map_err(|_| TimestampError::InvalidOffset(s.to_string()))
    }

    /// Render an instant at second granularity.
    pub fn render(&self, instant: DateTime<Utc>) -> String {
        match self {
            Self::Local => instant.with_timezone(&Local).format(LOCAL_FORMAT).to_string(),
            Self::Fixed(offset) => instant.with_timezone(offset).format(FIXED_FORMAT).to_string(),
        }
    }
}

/// Parse a rendered timestamp (either form) back into an instant.
///
/// Suffix-less values are read as host local time.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, TimestampError> {
    if let Ok(dt) = DateTime::parse_from_str(s, FIXED_FORMAT) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, LOCAL_FORMAT)
        .map_err(|_| TimestampError::Unparseable(s.to_string()))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or(TimestampError::NonexistentLocalTime(naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_system_clock_advances_from_its_anchor() {
        let anchor = at("2025-01-02T04:30:15Z");
        let clock = SystemClock {
            wall_start: anchor,
            mono_start: Instant::now(),
        };
        let first = clock.now();
        let second = clock.now();
        assert!(first >= anchor);
        assert!(second >= first);
        // Independent of the host wall clock, which is years past the anchor.
        assert!(second - anchor < TimeDelta::seconds(60));
    }

    #[test]
    fn test_fixed_offset_rendering() {
        let format = TimestampFormat::from_offset_str("+05:30").unwrap();
        let rendered = format.render(at("2025-01-02T04:30:15.750Z"));
        assert_eq!(rendered, "2025-01-02 10:00:15+05:30");
    }

    #[test]
    fn test_negative_offset_rendering() {
        let format = TimestampFormat::from_offset_str("-08:00").unwrap();
        assert_eq!(format.render(at("2025-03-01T07:00:00Z")), "2025-02-28 23:00:00-08:00");
    }

    #[test]
    fn test_invalid_offset() {
        assert!(TimestampFormat::from_offset_str("Asia/Kolkata").is_err());
        assert!(TimestampFormat::from_offset_str("").is_err());
    }

    #[test]
    fn test_fixed_round_trip_truncates_to_seconds() {
        let format = TimestampFormat::from_offset_str("+05:30").unwrap();
        let instant = at("2025-06-10T12:34:56.999Z");
        let parsed = parse_timestamp(&format.render(instant)).unwrap();
        assert_eq!(parsed, instant.with_nanosecond(0).unwrap());
    }

    #[test]
    fn test_local_round_trip() {
        let instant = at("2025-06-10T12:34:56Z");
        let rendered = TimestampFormat::Local.render(instant);
        assert_eq!(rendered.len(), "YYYY-MM-DD HH:MM:SS".len());
        assert_eq!(parse_timestamp(&rendered).unwrap(), instant);
    }

    #[test]
    fn test_rendered_timestamps_parse_in_order() {
        let format = TimestampFormat::from_offset_str("+01:00").unwrap();
        let earlier = parse_timestamp(&format.render(at("2025-01-01T23:59:59Z"))).unwrap();
        let later = parse_timestamp(&format.render(at("2025-01-02T00:00:01Z"))).unwrap();
        assert!(earlier < later);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("2025-01-02T10:00:00").is_err());
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(at("2025-01-01T00:00:00Z"));
        clock.advance(TimeDelta::milliseconds(1500));
        assert_eq!(clock.now(), at("2025-01-01T00:00:01.500Z"));
        clock.set(at("2030-01-01T00:00:00Z"));
        assert_eq!((&clock).now(), at("2030-01-01T00:00:00Z"));
    }
}
