//! Start scheduling
//!
//! Parses a requested start delay (immediate, relative, or an absolute
//! wall-clock time) and resolves it against the current local time. The
//! `SchedulingGate` then performs the admission check and the countdown.
//!
//! Accepted forms:
//! - relative: `now`, `5m`, `10m`, `30m`, `1h`, `2h`, plain minutes (`45`),
//!   or a number with `m`, `h` or `d` suffix; at most 7 days
//! - absolute: `HH:MM`, `MM-DD HH:MM`, `YYYY-MM-DD HH:MM`,
//!   `YYYY-MM-DD HH:MM:SS`

mod gate;

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use regex_lite::Regex;

pub use gate::{CountdownTick, GateError, GateOutcome, GateState, SchedulingGate, DEFAULT_TICK_INTERVAL};

/// Upper bound for relative delays
pub const MAX_RELATIVE_DELAY: Duration = Duration::from_secs(7 * 24 * 3600);

/// Preset delays offered interactively
pub const PRESETS: &[(&str, &str)] = &[
    ("now", "start immediately"),
    ("5m", "in 5 minutes"),
    ("10m", "in 10 minutes"),
    ("30m", "in 30 minutes"),
    ("1h", "in 1 hour"),
    ("2h", "in 2 hours"),
];

/// Scheduling errors
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid delay '{0}': use minutes or a value like 30m, 2h, 1d")]
    InvalidDelay(String),

    #[error("delay '{0}' exceeds the 7 day maximum")]
    DelayTooLong(String),

    #[error("invalid time '{0}': use HH:MM, MM-DD HH:MM or YYYY-MM-DD HH:MM[:SS]")]
    InvalidTime(String),

    #[error("start time {0} is in the past")]
    InPast(String),
}

/// Absolute start time as written by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsoluteTime {
    /// `HH:MM`, rolls to tomorrow when already elapsed
    TimeOfDay(NaiveTime),
    /// `MM-DD HH:MM`, rolls to next year when already elapsed
    MonthDay { month: u32, day: u32, time: NaiveTime },
    /// Fully specified
    DateTime(NaiveDateTime),
}

/// Requested start delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelaySpec {
    Immediate,
    Relative(Duration),
    Absolute(AbsoluteTime),
}

/// A resolved start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledStart {
    /// Local wall-clock start time
    pub target: NaiveDateTime,
    /// Wait from the resolution instant
    pub delay: Duration,
}

fn relative_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)\s*(m|min|h|d)?$").unwrap())
}

fn month_day_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d{1,2})-(\d{1,2})\s+(\d{1,2}:\d{2})$").unwrap())
}

impl DelaySpec {
    /// Parse either form; anything containing `:` is an absolute time
    pub fn parse(input: &str) -> Result<Self, ScheduleError> {
        if input.contains(':') {
            Self::parse_absolute(input)
        } else {
            Self::parse_relative(input)
        }
    }

    /// Parse a relative delay (presets, minutes, or unit suffix)
    pub fn parse_relative(input: &str) -> Result<Self, ScheduleError> {
        let text = input.trim().to_ascii_lowercase();
        if text.is_empty() || text == "now" {
            return Ok(DelaySpec::Immediate);
        }

        let caps = relative_pattern()
            .captures(&text)
            .ok_or_else(|| ScheduleError::InvalidDelay(input.to_string()))?;
        let value: u64 = caps[1]
            .parse()
            .map_err(|_| ScheduleError::DelayTooLong(input.to_string()))?;
        let unit_secs = match caps.get(2).map(|m| m.as_str()) {
            None | Some("m") | Some("min") => 60,
            Some("h") => 3600,
            Some("d") => 86_400,
            Some(_) => return Err(ScheduleError::InvalidDelay(input.to_string())),
        };

        let secs = value
            .checked_mul(unit_secs)
            .ok_or_else(|| ScheduleError::DelayTooLong(input.to_string()))?;
        let delay = Duration::from_secs(secs);
        if delay.is_zero() {
            Ok(DelaySpec::Immediate)
        } else if delay > MAX_RELATIVE_DELAY {
            Err(ScheduleError::DelayTooLong(input.to_string()))
        } else {
            Ok(DelaySpec::Relative(delay))
        }
    }

    /// Parse an absolute wall-clock time
    pub fn parse_absolute(input: &str) -> Result<Self, ScheduleError> {
        let text = input.trim();
        let invalid = || ScheduleError::InvalidTime(input.to_string());

        for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
                return Ok(DelaySpec::Absolute(AbsoluteTime::DateTime(dt)));
            }
        }

        if let Some(caps) = month_day_pattern().captures(text) {
            let month: u32 = caps[1].parse().map_err(|_| invalid())?;
            let day: u32 = caps[2].parse().map_err(|_| invalid())?;
            let time = NaiveTime::parse_from_str(&caps[3], "%H:%M").map_err(|_| invalid())?;
            // 2000 is a leap year, so Feb 29 is accepted here
            if NaiveDate::from_ymd_opt(2000, month, day).is_none() {
                return Err(invalid());
            }
            return Ok(DelaySpec::Absolute(AbsoluteTime::MonthDay { month, day, time }));
        }

        NaiveTime::parse_from_str(text, "%H:%M")
            .map(|t| DelaySpec::Absolute(AbsoluteTime::TimeOfDay(t)))
            .map_err(|_| invalid())
    }

    /// Resolve against `now` (local time)
    pub fn resolve(&self, now: NaiveDateTime) -> Result<ScheduledStart, ScheduleError> {
        let target = match *self {
            DelaySpec::Immediate => now,
            DelaySpec::Relative(delay) => {
                let step = chrono::Duration::from_std(delay).map_err(|_| ScheduleError::DelayTooLong(self.to_string()))?;
                now + step
            }
            DelaySpec::Absolute(AbsoluteTime::TimeOfDay(time)) => {
                let today = now.date().and_time(time);
                if today > now {
                    today
                } else {
                    today + chrono::Duration::days(1)
                }
            }
            DelaySpec::Absolute(AbsoluteTime::MonthDay { month, day, time }) => (now.year()..=now.year() + 8)
                .filter_map(|year| NaiveDate::from_ymd_opt(year, month, day))
                .map(|date| date.and_time(time))
                .find(|candidate| *candidate > now)
                .ok_or_else(|| ScheduleError::InvalidTime(self.to_string()))?,
            DelaySpec::Absolute(AbsoluteTime::DateTime(dt)) => {
                if dt <= now {
                    return Err(ScheduleError::InPast(dt.format("%Y-%m-%d %H:%M:%S").to_string()));
                }
                dt
            }
        };

        let delay = (target - now).to_std().unwrap_or(Duration::ZERO);
        Ok(ScheduledStart { target, delay })
    }
}

impl fmt::Display for DelaySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelaySpec::Immediate => write!(f, "now"),
            DelaySpec::Relative(d) => write!(f, "in {}", format_duration(*d)),
            DelaySpec::Absolute(AbsoluteTime::TimeOfDay(t)) => write!(f, "at {}", t.format("%H:%M")),
            DelaySpec::Absolute(AbsoluteTime::MonthDay { month, day, time }) => {
                write!(f, "at {:02}-{:02} {}", month, day, time.format("%H:%M"))
            }
            DelaySpec::Absolute(AbsoluteTime::DateTime(dt)) => write!(f, "at {}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// `1d 02:03:04` / `02:03:04` style rendering
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if days > 0 {
        format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_presets() {
        assert_eq!(DelaySpec::parse_relative("now").unwrap(), DelaySpec::Immediate);
        assert_eq!(
            DelaySpec::parse_relative("5m").unwrap(),
            DelaySpec::Relative(Duration::from_secs(300))
        );
        assert_eq!(
            DelaySpec::parse_relative("2h").unwrap(),
            DelaySpec::Relative(Duration::from_secs(7200))
        );
    }

    #[test]
    fn test_plain_minutes_and_suffixes() {
        assert_eq!(
            DelaySpec::parse_relative("45").unwrap(),
            DelaySpec::Relative(Duration::from_secs(45 * 60))
        );
        assert_eq!(
            DelaySpec::parse_relative(" 3H ").unwrap(),
            DelaySpec::Relative(Duration::from_secs(3 * 3600))
        );
        assert_eq!(
            DelaySpec::parse_relative("2d").unwrap(),
            DelaySpec::Relative(Duration::from_secs(2 * 86_400))
        );
        assert_eq!(DelaySpec::parse_relative("0").unwrap(), DelaySpec::Immediate);
    }

    #[test]
    fn test_relative_limits() {
        assert!(DelaySpec::parse_relative("7d").is_ok());
        assert!(matches!(DelaySpec::parse_relative("8d"), Err(ScheduleError::DelayTooLong(_))));
        assert!(matches!(
            DelaySpec::parse_relative("99999999999999999999"),
            Err(ScheduleError::DelayTooLong(_))
        ));
        assert!(matches!(DelaySpec::parse_relative("-5"), Err(ScheduleError::InvalidDelay(_))));
        assert!(matches!(DelaySpec::parse_relative("soon"), Err(ScheduleError::InvalidDelay(_))));
    }

    #[test]
    fn test_five_minutes_resolves_to_plus_300s() {
        let now = at("2025-03-10 12:00:00");
        let start = DelaySpec::parse("5").unwrap().resolve(now).unwrap();
        assert_eq!(start.target, at("2025-03-10 12:05:00"));
        assert_eq!(start.delay, Duration::from_secs(300));
    }

    #[test]
    fn test_time_of_day_rolls_to_tomorrow() {
        let now = at("2025-03-10 23:30:00");
        let start = DelaySpec::parse("22:00").unwrap().resolve(now).unwrap();
        assert_eq!(start.target, at("2025-03-11 22:00:00"));

        let later = DelaySpec::parse("23:45").unwrap().resolve(now).unwrap();
        assert_eq!(later.delay, Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_month_day_rolls_to_next_year() {
        let now = at("2025-03-10 12:00:00");
        let start = DelaySpec::parse("01-15 08:00").unwrap().resolve(now).unwrap();
        assert_eq!(start.target, at("2026-01-15 08:00:00"));

        let leap = DelaySpec::parse("02-29 08:00").unwrap().resolve(now).unwrap();
        assert_eq!(leap.target, at("2028-02-29 08:00:00"));

        assert!(matches!(DelaySpec::parse("02-30 08:00"), Err(ScheduleError::InvalidTime(_))));
    }

    #[test]
    fn test_full_datetime() {
        let now = at("2025-03-10 12:00:00");
        let start = DelaySpec::parse("2025-03-10 13:00").unwrap().resolve(now).unwrap();
        assert_eq!(start.delay, Duration::from_secs(3600));

        let secs = DelaySpec::parse("2025-03-10 12:00:30").unwrap().resolve(now).unwrap();
        assert_eq!(secs.delay, Duration::from_secs(30));

        assert!(matches!(
            DelaySpec::parse("2025-03-10 11:00").unwrap().resolve(now),
            Err(ScheduleError::InPast(_))
        ));
    }

    #[test]
    fn test_invalid_times() {
        assert!(matches!(DelaySpec::parse("25:00"), Err(ScheduleError::InvalidTime(_))));
        assert!(matches!(DelaySpec::parse("13-01 10:00"), Err(ScheduleError::InvalidTime(_))));
        assert!(matches!(DelaySpec::parse("tomorrow 10:00"), Err(ScheduleError::InvalidTime(_))));
    }

    #[test]
    fn test_display_and_format_duration() {
        assert_eq!(DelaySpec::Relative(Duration::from_secs(90)).to_string(), "in 00:01:30");
        assert_eq!(format_duration(Duration::from_secs(90_061)), "1d 01:01:01");
        assert_eq!(DelaySpec::Immediate.to_string(), "now");
    }
}
