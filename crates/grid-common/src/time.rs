//! Time axis handling: CF time units and calendar aggregation periods.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GridError, GridResult};

/// Time units used for every persisted dataset.
pub const STORE_TIME_UNITS: &str = "seconds since 1970-01-01 00:00:00";

/// Calendar used for every persisted dataset.
pub const STORE_CALENDAR: &str = "proleptic_gregorian";

/// Calendars whose day arithmetic matches chrono's proleptic Gregorian dates.
const SUPPORTED_CALENDARS: &[&str] = &["standard", "gregorian", "proleptic_gregorian"];

// Beyond this an offset no longer fits a chrono duration in milliseconds.
const MAX_OFFSET_MS: f64 = 1.0e15;

/// Base unit of a CF `"<unit> since <epoch>"` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "seconds" | "second" | "secs" | "sec" | "s" => Some(TimeUnit::Seconds),
            "minutes" | "minute" | "mins" | "min" => Some(TimeUnit::Minutes),
            "hours" | "hour" | "hrs" | "hr" | "h" => Some(TimeUnit::Hours),
            "days" | "day" | "d" => Some(TimeUnit::Days),
            _ => None,
        }
    }

    fn seconds(&self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3600.0,
            TimeUnit::Days => 86400.0,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
        }
    }
}

/// Parsed CF time units, e.g. `hours since 1900-01-01 00:00:00.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfTimeUnits {
    pub unit: TimeUnit,
    pub epoch: NaiveDateTime,
}

impl CfTimeUnits {
    /// Parse a units string and optional calendar attribute.
    ///
    /// Non-Gregorian calendars are rejected because their day counts cannot
    /// be mapped onto calendar dates without loss.
    pub fn parse(units: &str, calendar: Option<&str>) -> GridResult<Self> {
        if let Some(cal) = calendar {
            let cal = cal.trim().to_lowercase();
            if !SUPPORTED_CALENDARS.contains(&cal.as_str()) {
                return Err(GridError::InvalidTime(format!(
                    "unsupported calendar '{}'",
                    cal
                )));
            }
        }

        let mut parts = units.trim().splitn(3, ' ');
        let unit_str = parts.next().unwrap_or_default();
        let since = parts.next().unwrap_or_default();
        let epoch_str = parts.next().unwrap_or_default();

        if !since.eq_ignore_ascii_case("since") || epoch_str.is_empty() {
            return Err(GridError::InvalidTime(format!(
                "unexpected time units format: '{}'",
                units
            )));
        }

        let unit = TimeUnit::parse(unit_str).ok_or_else(|| {
            GridError::InvalidTime(format!("unknown time unit '{}'", unit_str))
        })?;
        let epoch = parse_epoch(epoch_str)?;

        Ok(Self { unit, epoch })
    }

    /// Units used for persisted datasets.
    pub fn store_default() -> Self {
        Self {
            unit: TimeUnit::Seconds,
            epoch: NaiveDate::from_ymd_opt(1970, 1, 1)
                .unwrap_or_default()
                .and_time(NaiveTime::MIN),
        }
    }

    /// Convert an offset in these units to a timestamp.
    pub fn decode(&self, value: f64) -> GridResult<NaiveDateTime> {
        if !value.is_finite() {
            return Err(GridError::InvalidTime(format!(
                "non-finite time offset {}",
                value
            )));
        }
        let ms = (value * self.unit.seconds() * 1000.0).round();
        if ms.abs() > MAX_OFFSET_MS {
            return Err(GridError::InvalidTime(format!(
                "time offset {} {} out of range",
                value,
                self.unit.as_str()
            )));
        }
        self.epoch
            .checked_add_signed(Duration::milliseconds(ms as i64))
            .ok_or_else(|| GridError::InvalidTime(format!("time offset {} overflows", value)))
    }

    /// Convert a timestamp to an offset in these units.
    pub fn encode(&self, time: NaiveDateTime) -> f64 {
        let ms = (time - self.epoch).num_milliseconds() as f64;
        ms / 1000.0 / self.unit.seconds()
    }
}

impl fmt::Display for CfTimeUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} since {}",
            self.unit.as_str(),
            self.epoch.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

fn parse_epoch(s: &str) -> GridResult<NaiveDateTime> {
    let trimmed = s
        .trim()
        .trim_end_matches(" UTC")
        .trim_end_matches('Z')
        .trim_end_matches("+00:00")
        .trim();

    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(ts);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }

    Err(GridError::InvalidTime(format!(
        "failed to parse reference time '{}'",
        s
    )))
}

/// Calendar period used as the aggregation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Month,
}

impl Period {
    /// Start of the period containing `time` (date-only truncation, no timezone).
    pub fn truncate(&self, time: NaiveDateTime) -> NaiveDateTime {
        let date = time.date();
        let start = match self {
            Period::Day => date,
            Period::Month => date.with_day(1).unwrap_or(date),
        };
        start.and_time(NaiveTime::MIN)
    }

    /// Start of the period following the one that starts at `start`.
    pub fn next(&self, start: NaiveDateTime) -> NaiveDateTime {
        match self {
            Period::Day => start + Duration::days(1),
            Period::Month => {
                let date = start.date();
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
                    .map(|d| d.and_time(NaiveTime::MIN))
                    .unwrap_or(start)
            }
        }
    }

    /// Every period start from the period of `first` through the period of
    /// `last`, inclusive and without gaps.
    pub fn span(&self, first: NaiveDateTime, last: NaiveDateTime) -> Vec<NaiveDateTime> {
        let end = self.truncate(last);
        let mut current = self.truncate(first);
        let mut periods = Vec::new();
        while current <= end {
            periods.push(current);
            let next = self.next(current);
            if next <= current {
                break;
            }
            current = next;
        }
        periods
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Month => "month",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check that time labels are strictly increasing (and therefore unique).
pub fn check_strictly_increasing(times: &[NaiveDateTime]) -> GridResult<()> {
    for (i, pair) in times.windows(2).enumerate() {
        if pair[1] <= pair[0] {
            return Err(GridError::InvalidTime(format!(
                "time labels not strictly increasing at index {}: {} then {}",
                i + 1,
                pair[0],
                pair[1]
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn ts(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_parse_era5_units() {
        let units = CfTimeUnits::parse("hours since 1900-01-01 00:00:00.0", Some("gregorian")).unwrap();
        assert_eq!(units.unit, TimeUnit::Hours);
        let t = units.decode(1_078_320.0).unwrap();
        assert_eq!(t, ts(2023, 1, 6, 0));
    }

    #[test]
    fn test_parse_seconds_since_epoch_date_only() {
        let units = CfTimeUnits::parse("seconds since 1970-01-01", Some("proleptic_gregorian")).unwrap();
        let t = units.decode(1_704_067_200.0).unwrap();
        assert_eq!(t, ts(2024, 1, 1, 0));
        assert_eq!(units.encode(t), 1_704_067_200.0);
    }

    #[test]
    fn test_rejects_unsupported_calendar() {
        assert!(CfTimeUnits::parse("days since 2000-01-01", Some("noleap")).is_err());
        assert!(CfTimeUnits::parse("fortnights since 2000-01-01", None).is_err());
        assert!(CfTimeUnits::parse("days after 2000-01-01", None).is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let units = CfTimeUnits::store_default();
        assert_eq!(units.to_string(), STORE_TIME_UNITS);
        assert_eq!(CfTimeUnits::parse(STORE_TIME_UNITS, None).unwrap(), units);
    }

    #[test]
    fn test_truncate_day_and_month() {
        let t = ts(2024, 2, 29, 23);
        assert_eq!(Period::Day.truncate(t), ts(2024, 2, 29, 0));
        assert_eq!(Period::Month.truncate(t), ts(2024, 2, 1, 0));
        assert_eq!(Period::Day.truncate(t).hour(), 0);
    }

    #[test]
    fn test_span_covers_gaps() {
        let days = Period::Day.span(ts(2023, 12, 30, 5), ts(2024, 1, 2, 1));
        assert_eq!(days.len(), 4);
        assert_eq!(days[3], ts(2024, 1, 2, 0));

        let months = Period::Month.span(ts(2023, 11, 15, 0), ts(2024, 2, 3, 0));
        assert_eq!(months, vec![ts(2023, 11, 1, 0), ts(2023, 12, 1, 0), ts(2024, 1, 1, 0), ts(2024, 2, 1, 0)]);
    }

    #[test]
    fn test_leap_year_day_count() {
        let days = Period::Day.span(ts(2024, 1, 1, 0), ts(2024, 12, 31, 23));
        assert_eq!(days.len(), 366);
    }

    #[test]
    fn test_strictly_increasing() {
        assert!(check_strictly_increasing(&[ts(2024, 1, 1, 0), ts(2024, 1, 1, 1)]).is_ok());
        assert!(check_strictly_increasing(&[ts(2024, 1, 1, 1), ts(2024, 1, 1, 1)]).is_err());
    }
}
