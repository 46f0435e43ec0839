//! Bucketing of sparse samples, shared by the engines that store individual
//! `(time, value)` samples rather than a fixed grid.

use super::EngineQuery;
use crate::error::{Error, Result};
use crate::models::Point;
use crate::time::{CalendarInterval, Interval};
use chrono_tz::Tz;
use serde::Serialize;

/// One row of a time-of-day query: the bucket start and one value per split.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DmyRow {
    pub time: i64,
    pub values: Vec<Option<f64>>,
}

/// Sample range `[lo, hi)` an engine must load to answer `query`.
pub fn window(query: &EngineQuery) -> Result<(i64, i64)> {
    match query.interval {
        Interval::Seconds(i) if i > 0 => {
            Ok((query.start - query.start.rem_euclid(i), query.end.saturating_add(i)))
        }
        Interval::Seconds(_) => Ok((query.start, query.end.saturating_add(1))),
        Interval::Calendar(calendar) => Ok((
            calendar.bucket_start(query.start, query.timezone)?,
            calendar.next_bucket_start(query.end, query.timezone)?,
        )),
    }
}

/// Bucket starts covering `[start, end]` with their exclusive ends.
pub fn buckets(query: &EngineQuery) -> Result<Vec<(i64, i64)>> {
    match query.interval {
        Interval::Seconds(i) if i > 0 => {
            let mut out = Vec::new();
            let mut time = query.start - query.start.rem_euclid(i);
            while time <= query.end {
                out.push((time, time + i));
                time += i;
            }
            Ok(out)
        }
        Interval::Seconds(_) => Err(Error::Validation("Invalid interval".to_string())),
        Interval::Calendar(calendar) => calendar_buckets(calendar, query.start, query.end, query.timezone),
    }
}

fn calendar_buckets(calendar: CalendarInterval, start: i64, end: i64, tz: Tz) -> Result<Vec<(i64, i64)>> {
    let starts = calendar.boundaries(start, end, tz)?;
    let mut out = Vec::with_capacity(starts.len());
    for (idx, bucket) in starts.iter().enumerate() {
        let next = match starts.get(idx + 1) {
            Some(next) => *next,
            None => calendar.next_bucket_start(*bucket, tz)?,
        };
        out.push((*bucket, next));
    }
    Ok(out)
}

/// Reduces ascending `samples` to one point per bucket of `query`.
///
/// Without averaging each bucket takes its first sample. Empty buckets become
/// gaps at the bucket start, or are omitted under skip-missing, in which case
/// sampled points keep their own timestamp. A non-positive interval returns
/// the raw samples in range.
pub fn sample_points(samples: &[Point], query: &EngineQuery) -> Result<Vec<Point>> {
    if matches!(query.interval, Interval::Seconds(i) if i <= 0) {
        return Ok(samples
            .iter()
            .filter(|p| p.time >= query.start && p.time <= query.end)
            .filter(|p| !query.skip_missing || p.value.is_some())
            .copied()
            .collect());
    }

    let buckets = buckets(query)?;
    let mut out = Vec::with_capacity(buckets.len());
    let mut idx = samples.partition_point(|p| p.time < buckets.first().map_or(query.start, |b| b.0));

    for (bucket_start, bucket_end) in buckets {
        while idx < samples.len() && samples[idx].time < bucket_start {
            idx += 1;
        }
        let first = idx;
        while idx < samples.len() && samples[idx].time < bucket_end {
            idx += 1;
        }
        let in_bucket = &samples[first..idx];

        let point = if query.average {
            let values: Vec<f64> = in_bucket.iter().filter_map(|p| p.value).collect();
            let mean = (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
            Point::new(bucket_start, mean)
        } else {
            match in_bucket.first() {
                Some(sample) if query.skip_missing => *sample,
                Some(sample) => Point::new(bucket_start, sample.value),
                None => Point::gap(bucket_start),
            }
        };

        if point.value.is_none() && query.skip_missing {
            continue;
        }
        out.push(point);
    }
    Ok(out)
}

/// Value at or before `time` in ascending `samples`.
pub fn value_at_or_before(samples: &[Point], time: i64) -> Option<f64> {
    let idx = samples.partition_point(|p| p.time <= time);
    idx.checked_sub(1).and_then(|i| samples[i].value)
}

/// For each calendar bucket in the query, the value at each `split` hour
/// offset from the bucket start.
pub fn time_of_day_rows<F>(query: &EngineQuery, split: &[f64], mut lookup: F) -> Result<Vec<DmyRow>>
where
    F: FnMut(i64) -> Option<f64>,
{
    let Interval::Calendar(calendar) = query.interval else {
        return Err(Error::Validation(
            "Time of day queries need a daily, weekly, monthly or annual interval".to_string(),
        ));
    };
    let rows = calendar_buckets(calendar, query.start, query.end, query.timezone)?
        .into_iter()
        .map(|(bucket, _)| DmyRow {
            time: bucket,
            values: split
                .iter()
                .map(|hours| lookup(bucket + (hours * 3600.0).round() as i64))
                .collect(),
        })
        .collect();
    Ok(rows)
}
