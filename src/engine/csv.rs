//! CSV rendering of point series.

use crate::error::Result;
use crate::models::Point;
use crate::time::{format_time, TimeFormat};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvSettings {
    pub field_separator: String,
    pub decimal_separator: String,
    /// Digits after the decimal separator; negative leaves values unformatted
    pub decimal_places: i32,
}

impl Default for CsvSettings {
    fn default() -> Self {
        Self {
            field_separator: ",".to_string(),
            decimal_separator: ".".to_string(),
            decimal_places: 2,
        }
    }
}

impl CsvSettings {
    /// Nulls render as an empty field.
    pub fn format_value(&self, value: Option<f64>) -> String {
        let Some(value) = value else {
            return String::new();
        };
        let text = if self.decimal_places >= 0 {
            format!("{:.*}", self.decimal_places as usize, value)
        } else {
            value.to_string()
        };
        if self.decimal_separator == "." {
            text
        } else {
            text.replace('.', &self.decimal_separator)
        }
    }
}

fn time_field(time: i64, format: TimeFormat, tz: Tz) -> Result<String> {
    Ok(format_time(time, format, tz)?.to_string())
}

pub fn write_points(
    out: &mut (dyn Write + Send),
    points: &[Point],
    settings: &CsvSettings,
    format: TimeFormat,
    tz: Tz,
) -> Result<u64> {
    let mut rows = 0;
    for point in points {
        let value = settings.format_value(point.value);
        if format == TimeFormat::NoTime {
            writeln!(out, "{}", value)?;
        } else {
            let time = time_field(point.time, format, tz)?;
            writeln!(out, "{}{}{}", time, settings.field_separator, value)?;
        }
        rows += 1;
    }
    out.flush()?;
    Ok(rows)
}

/// Writes several series aligned on time: one row per distinct timestamp,
/// one column per series, empty fields where a series has no sample.
pub fn write_aligned(
    out: &mut (dyn Write + Send),
    series: &[Vec<Point>],
    settings: &CsvSettings,
    format: TimeFormat,
    tz: Tz,
) -> Result<u64> {
    let mut times: Vec<i64> = series.iter().flatten().map(|p| p.time).collect();
    times.sort_unstable();
    times.dedup();

    let mut cursors = vec![0usize; series.len()];
    let mut rows = 0;
    for time in times {
        let mut fields = Vec::with_capacity(series.len() + 1);
        if format != TimeFormat::NoTime {
            fields.push(time_field(time, format, tz)?);
        }
        for (points, cursor) in series.iter().zip(cursors.iter_mut()) {
            while *cursor < points.len() && points[*cursor].time < time {
                *cursor += 1;
            }
            let value = match points.get(*cursor) {
                Some(point) if point.time == time => point.value,
                _ => None,
            };
            fields.push(settings.format_value(value));
        }
        writeln!(out, "{}", fields.join(&settings.field_separator))?;
        rows += 1;
    }
    out.flush()?;
    Ok(rows)
}
