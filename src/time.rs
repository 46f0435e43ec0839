//! Time handling shared by the request guard, the engines and the output stage.
//!
//! Covers request time normalisation (epoch seconds, millisecond epochs and
//! date expressions), calendar buckets resolved in a named timezone, and the
//! client-facing time formats.

use crate::error::{Error, Result};
use chrono::{
    DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamps above this are taken to be milliseconds.
const SECONDS_SCALE_LIMIT: f64 = 100.0 * 1_000_000_000.0;

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::Validation(format!("Invalid timezone: {}", name)))
}

/// A request time as supplied by the caller: an epoch number or a date
/// expression such as `2024-01-31 12:00` or `-2 days`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeArg {
    Epoch(f64),
    Expr(String),
}

impl From<i64> for TimeArg {
    fn from(value: i64) -> Self {
        TimeArg::Epoch(value as f64)
    }
}

impl From<&str> for TimeArg {
    fn from(value: &str) -> Self {
        TimeArg::Expr(value.to_string())
    }
}

/// Resolves a request time to epoch seconds in `tz`, dividing millisecond
/// epochs by 1000.
pub fn convert_time(arg: &TimeArg, tz: Tz, now: DateTime<Utc>) -> Result<i64> {
    let time = match arg {
        TimeArg::Epoch(value) => *value,
        TimeArg::Expr(expr) => match expr.trim().parse::<f64>() {
            Ok(value) => value,
            Err(_) => parse_time_expression(expr, tz, now)? as f64,
        },
    };
    if !time.is_finite() {
        return Err(Error::Validation("Invalid time".to_string()));
    }
    let time = if time > SECONDS_SCALE_LIMIT {
        time * 0.001
    } else {
        time
    };
    Ok(time as i64)
}

fn local_to_epoch(naive: NaiveDateTime, tz: Tz) -> Result<i64> {
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return Ok(dt.timestamp());
    }
    // Wall-clock time skipped by a DST transition: take the hour after.
    let shifted = naive + chrono::Duration::hours(1);
    tz.from_local_datetime(&shifted)
        .earliest()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| Error::Validation(format!("Unrepresentable local time {}", naive)))
}

fn local_midnight(date: NaiveDate, tz: Tz) -> Result<i64> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::Validation(format!("Invalid date {}", date)))?;
    local_to_epoch(naive, tz)
}

fn local_date(time: i64, tz: Tz) -> Result<NaiveDate> {
    tz.timestamp_opt(time, 0)
        .single()
        .map(|dt| dt.date_naive())
        .ok_or_else(|| Error::Validation(format!("Invalid timestamp {}", time)))
}

/// Parses the date expressions accepted for request start/end times.
pub fn parse_time_expression(expr: &str, tz: Tz, now: DateTime<Utc>) -> Result<i64> {
    let input = expr.trim().to_lowercase();
    let invalid = || Error::Validation(format!("Invalid time expression: {}", expr));
    let today = now.with_timezone(&tz).date_naive();

    match input.as_str() {
        "now" => return Ok(now.timestamp()),
        "today" | "midnight" => return local_midnight(today, tz),
        "yesterday" => return local_midnight(today - Days::new(1), tz),
        "tomorrow" => return local_midnight(today + Days::new(1), tz),
        _ => {}
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(expr.trim()) {
        return Ok(dt.timestamp());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(expr.trim(), format) {
            return local_to_epoch(naive, tz);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(expr.trim(), "%Y-%m-%d") {
        return local_midnight(date, tz);
    }

    let tokens: Vec<&str> = input.split_whitespace().collect();
    let (amount, unit) = match tokens.as_slice() {
        [amount, unit] => (amount.parse::<i64>().map_err(|_| invalid())?, *unit),
        [amount, unit, "ago"] => (-amount.parse::<i64>().map_err(|_| invalid())?, *unit),
        _ => return Err(invalid()),
    };
    let unit = unit.trim_end_matches('s');
    let local = now.with_timezone(&tz).naive_local();
    let shifted = match unit {
        "sec" | "second" => return Ok(now.timestamp() + amount),
        "min" | "minute" => return Ok(now.timestamp() + amount * 60),
        "hour" => return Ok(now.timestamp() + amount * 3600),
        "day" => shift_days(local, amount),
        "week" => shift_days(local, amount * 7),
        "month" => shift_months(local, amount),
        "year" => shift_months(local, amount * 12),
        _ => None,
    }
    .ok_or_else(invalid)?;
    local_to_epoch(shifted, tz)
}

fn shift_days(local: NaiveDateTime, days: i64) -> Option<NaiveDateTime> {
    if days >= 0 {
        local.checked_add_days(Days::new(days as u64))
    } else {
        local.checked_sub_days(Days::new(days.unsigned_abs()))
    }
}

fn shift_months(local: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let count = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        local.checked_add_months(Months::new(count))
    } else {
        local.checked_sub_months(Months::new(count))
    }
}

/// Named calendar buckets, resolved in the request timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarInterval {
    Daily,
    Weekly,
    Monthly,
    Annual,
}

impl CalendarInterval {
    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "daily" => Some(CalendarInterval::Daily),
            "weekly" => Some(CalendarInterval::Weekly),
            "monthly" => Some(CalendarInterval::Monthly),
            "annual" => Some(CalendarInterval::Annual),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CalendarInterval::Daily => "daily",
            CalendarInterval::Weekly => "weekly",
            CalendarInterval::Monthly => "monthly",
            CalendarInterval::Annual => "annual",
        }
    }

    fn floor_date(self, date: NaiveDate) -> NaiveDate {
        match self {
            CalendarInterval::Daily => date,
            CalendarInterval::Weekly => {
                date - Days::new(u64::from(date.weekday().num_days_from_monday()))
            }
            CalendarInterval::Monthly => date.with_day(1).unwrap_or(date),
            CalendarInterval::Annual => date.with_day(1).and_then(|d| d.with_month(1)).unwrap_or(date),
        }
    }

    fn step_date(self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            CalendarInterval::Daily => date.checked_add_days(Days::new(1)),
            CalendarInterval::Weekly => date.checked_add_days(Days::new(7)),
            CalendarInterval::Monthly => date.checked_add_months(Months::new(1)),
            CalendarInterval::Annual => date.checked_add_months(Months::new(12)),
        }
    }

    /// Start of the bucket containing `time`.
    pub fn bucket_start(self, time: i64, tz: Tz) -> Result<i64> {
        local_midnight(self.floor_date(local_date(time, tz)?), tz)
    }

    /// Start of the bucket following the one containing `time`.
    pub fn next_bucket_start(self, time: i64, tz: Tz) -> Result<i64> {
        let date = self.floor_date(local_date(time, tz)?);
        let next = self
            .step_date(date)
            .ok_or_else(|| Error::Validation("Date out of range".to_string()))?;
        local_midnight(next, tz)
    }

    /// Bucket starts from the bucket containing `start` up to and including
    /// `end`.
    pub fn boundaries(self, start: i64, end: i64, tz: Tz) -> Result<Vec<i64>> {
        let mut out = Vec::new();
        let mut time = self.bucket_start(start, tz)?;
        while time <= end {
            out.push(time);
            time = self.next_bucket_start(time, tz)?;
        }
        Ok(out)
    }
}

/// Request interval: a positive number of seconds or a calendar bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Interval {
    Seconds(i64),
    Calendar(CalendarInterval),
}

impl Interval {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if let Some(calendar) = CalendarInterval::parse(input) {
            return Ok(Interval::Calendar(calendar));
        }
        input
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(|value| Interval::Seconds(value as i64))
            .ok_or_else(|| Error::Validation(format!("Invalid interval: {}", input)))
    }

    pub fn seconds(self) -> Option<i64> {
        match self {
            Interval::Seconds(seconds) => Some(seconds),
            Interval::Calendar(_) => None,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Seconds(seconds) => write!(f, "{}", seconds),
            Interval::Calendar(calendar) => f.write_str(calendar.as_str()),
        }
    }
}

/// Moves `end` to the next boundary so a delta query has a right-hand
/// neighbour for its last bucket.
pub fn delta_mode_next_interval(end: i64, interval: Interval, tz: Tz) -> Result<i64> {
    match interval {
        Interval::Calendar(calendar) => {
            let tomorrow = local_date(end, tz)?
                .checked_add_days(Days::new(1))
                .ok_or_else(|| Error::Validation("Date out of range".to_string()))?;
            let date = match calendar {
                CalendarInterval::Daily => Some(tomorrow),
                CalendarInterval::Weekly => {
                    let ahead = 7 - u64::from(tomorrow.weekday().num_days_from_monday());
                    tomorrow.checked_add_days(Days::new(ahead))
                }
                CalendarInterval::Monthly => tomorrow
                    .with_day(1)
                    .and_then(|d| d.checked_add_months(Months::new(1))),
                CalendarInterval::Annual => NaiveDate::from_ymd_opt(tomorrow.year() + 1, 1, 1),
            }
            .ok_or_else(|| Error::Validation("Date out of range".to_string()))?;
            local_midnight(date, tz)
        }
        Interval::Seconds(seconds) if seconds > 0 => Ok(end.div_euclid(seconds) * seconds + seconds),
        Interval::Seconds(_) => Ok(end),
    }
}

/// Client-facing time representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFormat {
    #[serde(rename = "unix")]
    Unix,
    #[serde(rename = "unixms")]
    UnixMs,
    #[serde(rename = "excel")]
    Excel,
    #[serde(rename = "iso8601")]
    Iso8601,
    #[serde(rename = "notime")]
    NoTime,
}

impl TimeFormat {
    pub fn parse(input: &str) -> Result<Self> {
        match input {
            "unix" => Ok(TimeFormat::Unix),
            "unixms" => Ok(TimeFormat::UnixMs),
            "excel" => Ok(TimeFormat::Excel),
            "iso8601" => Ok(TimeFormat::Iso8601),
            "notime" => Ok(TimeFormat::NoTime),
            _ => Err(Error::Validation("Invalid time format".to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeFormat::Unix => "unix",
            TimeFormat::UnixMs => "unixms",
            TimeFormat::Excel => "excel",
            TimeFormat::Iso8601 => "iso8601",
            TimeFormat::NoTime => "notime",
        }
    }
}

/// A formatted time as it appears in output rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Timestamp {
    Seconds(i64),
    Millis(i64),
    Text(String),
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Seconds(t) | Timestamp::Millis(t) => write!(f, "{}", t),
            Timestamp::Text(text) => f.write_str(text),
        }
    }
}

pub fn format_time(time: i64, format: TimeFormat, tz: Tz) -> Result<Timestamp> {
    match format {
        TimeFormat::UnixMs => Ok(Timestamp::Millis(time * 1000)),
        TimeFormat::Excel | TimeFormat::Iso8601 => {
            let dt = tz
                .timestamp_opt(time, 0)
                .single()
                .ok_or_else(|| Error::Validation(format!("Invalid timestamp {}", time)))?;
            let text = if format == TimeFormat::Excel {
                dt.format("%d/%m/%Y %H:%M:%S").to_string()
            } else {
                dt.to_rfc3339_opts(SecondsFormat::Secs, false)
            };
            Ok(Timestamp::Text(text))
        }
        TimeFormat::Unix | TimeFormat::NoTime => Ok(Timestamp::Seconds(time)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        // 2024-03-14 15:09:26 UTC, a Thursday
        Utc.timestamp_opt(1_710_428_966, 0).unwrap()
    }

    #[test]
    fn test_convert_time_detects_milliseconds() {
        let now = fixed_now();
        assert_eq!(convert_time(&TimeArg::from(1_700_000_000), Tz::UTC, now).unwrap(), 1_700_000_000);
        assert_eq!(
            convert_time(&TimeArg::Epoch(1_700_000_000_000.0), Tz::UTC, now).unwrap(),
            1_700_000_000
        );
        assert_eq!(convert_time(&TimeArg::from("1700000000"), Tz::UTC, now).unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_date_expressions() {
        let now = fixed_now();
        assert_eq!(parse_time_expression("now", Tz::UTC, now).unwrap(), 1_710_428_966);
        assert_eq!(parse_time_expression("today", Tz::UTC, now).unwrap(), 1_710_374_400);
        assert_eq!(parse_time_expression("yesterday", Tz::UTC, now).unwrap(), 1_710_288_000);
        assert_eq!(parse_time_expression("2024-03-14", Tz::UTC, now).unwrap(), 1_710_374_400);
        assert_eq!(
            parse_time_expression("2024-03-14 01:00", Tz::UTC, now).unwrap(),
            1_710_378_000
        );
        assert_eq!(parse_time_expression("-1 hour", Tz::UTC, now).unwrap(), 1_710_425_366);
        assert_eq!(parse_time_expression("2 days ago", Tz::UTC, now).unwrap(), 1_710_256_166);
        assert!(parse_time_expression("next blue moon", Tz::UTC, now).is_err());
    }

    #[test]
    fn test_timezone_changes_midnight() {
        let now = fixed_now();
        let paris = parse_timezone("Europe/Paris").unwrap();
        // Paris is UTC+1 in March before the DST switch
        assert_eq!(parse_time_expression("2024-03-14", paris, now).unwrap(), 1_710_370_800);
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_interval_parse() {
        assert_eq!(Interval::parse("60").unwrap(), Interval::Seconds(60));
        assert_eq!(Interval::parse("0").unwrap(), Interval::Seconds(0));
        assert_eq!(Interval::parse("weekly").unwrap(), Interval::Calendar(CalendarInterval::Weekly));
        assert!(Interval::parse("fortnightly").is_err());
    }

    #[test]
    fn test_delta_mode_next_interval() {
        let tz = Tz::UTC;
        // numeric: next multiple strictly after end
        assert_eq!(delta_mode_next_interval(125, Interval::Seconds(10), tz).unwrap(), 130);
        assert_eq!(delta_mode_next_interval(120, Interval::Seconds(10), tz).unwrap(), 130);

        let thursday = 1_710_428_966;
        let daily = delta_mode_next_interval(thursday, Interval::Calendar(CalendarInterval::Daily), tz);
        assert_eq!(daily.unwrap(), 1_710_460_800); // Fri 2024-03-15 00:00
        let weekly = delta_mode_next_interval(thursday, Interval::Calendar(CalendarInterval::Weekly), tz);
        assert_eq!(weekly.unwrap(), 1_710_720_000); // Mon 2024-03-18 00:00
        let monthly = delta_mode_next_interval(thursday, Interval::Calendar(CalendarInterval::Monthly), tz);
        assert_eq!(monthly.unwrap(), 1_711_929_600); // 2024-04-01 00:00
        let annual = delta_mode_next_interval(thursday, Interval::Calendar(CalendarInterval::Annual), tz);
        assert_eq!(annual.unwrap(), 1_735_689_600); // 2025-01-01 00:00
    }

    #[test]
    fn test_calendar_boundaries() {
        let tz = Tz::UTC;
        let days = CalendarInterval::Daily.boundaries(1_710_428_966, 1_710_600_000, tz).unwrap();
        assert_eq!(days, vec![1_710_374_400, 1_710_460_800, 1_710_547_200]);
        let week = CalendarInterval::Weekly.bucket_start(1_710_428_966, tz).unwrap();
        assert_eq!(week, 1_710_115_200); // Mon 2024-03-11
    }

    #[test]
    fn test_format_time() {
        let tz = Tz::UTC;
        assert_eq!(format_time(10, TimeFormat::UnixMs, tz).unwrap(), Timestamp::Millis(10_000));
        assert_eq!(format_time(10, TimeFormat::Unix, tz).unwrap(), Timestamp::Seconds(10));
        assert_eq!(
            format_time(1_710_428_966, TimeFormat::Excel, tz).unwrap(),
            Timestamp::Text("14/03/2024 15:09:26".to_string())
        );
        assert_eq!(
            format_time(1_710_428_966, TimeFormat::Iso8601, tz).unwrap(),
            Timestamp::Text("2024-03-14T15:09:26+00:00".to_string())
        );
        assert!(TimeFormat::parse("rfc822").is_err());
    }
}
