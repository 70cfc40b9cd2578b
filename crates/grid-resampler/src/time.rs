//! Calendar helpers for the 3-hourly grid cadence.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ResampleError, Result};

/// Native cadence of the analysis grids, in hours.
pub const CADENCE_HOURS: u32 = 3;

/// Native cadence of the analysis grids, in seconds.
pub const CADENCE_SECONDS: i64 = CADENCE_HOURS as i64 * 3600;

/// Hour of day at which the daily forecast is issued.
pub const FORECAST_ISSUE_HOUR: u32 = 12;

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Parse a request key such as `2024-06-01T06:00:00`.
///
/// Request keys carry no zone and are read as UTC wall time.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    let trimmed = s.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| ResampleError::InvalidTimestamp(s.to_string()))
}

/// Format a timestamp the way request keys are written.
pub fn format_timestamp(t: &NaiveDateTime) -> String {
    t.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Latest cadence snapshot at or before `t` (hour floored to a multiple of 3, minutes zeroed).
pub fn floor_to_cadence(t: &NaiveDateTime) -> NaiveDateTime {
    let hour = (t.hour() / CADENCE_HOURS) * CADENCE_HOURS;
    t.date().and_hms_opt(hour, 0, 0).unwrap_or(*t)
}

/// The snapshot one cadence step after `t`.
pub fn next_snapshot(t: &NaiveDateTime) -> NaiveDateTime {
    *t + Duration::hours(CADENCE_HOURS as i64)
}

/// Whether `t` sits exactly on a cadence boundary.
///
/// Seconds are not considered; only the hour and minute fields decide.
pub fn is_on_cadence(t: &NaiveDateTime) -> bool {
    t.minute() == 0 && t.hour() % CADENCE_HOURS == 0
}

/// A calendar year and month, the unit of retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(ResampleError::config(format!("month {} out of range", month)));
        }
        Ok(Self { year, month })
    }

    /// The month a timestamp falls in.
    pub fn of(t: &NaiveDateTime) -> Self {
        Self {
            year: t.year(),
            month: t.month(),
        }
    }

    /// The following calendar month.
    pub fn succ(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Whether `t` falls in this month.
    pub fn contains(&self, t: &NaiveDateTime) -> bool {
        t.year() == self.year && t.month() == self.month
    }

    /// Number of days in this month.
    pub fn days_in_month(&self) -> u32 {
        let next = self.succ();
        match (
            NaiveDate::from_ymd_opt(self.year, self.month, 1),
            NaiveDate::from_ymd_opt(next.year, next.month, 1),
        ) {
            (Some(first), Some(following)) => (following - first).num_days() as u32,
            _ => 0,
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = ResampleError;

    fn from_str(s: &str) -> Result<Self> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| ResampleError::config(format!("invalid year-month '{}'", s)))?;
        let year = year
            .parse::<i32>()
            .map_err(|_| ResampleError::config(format!("invalid year in '{}'", s)))?;
        let month = month
            .parse::<u32>()
            .map_err(|_| ResampleError::config(format!("invalid month in '{}'", s)))?;
        Self::new(year, month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
