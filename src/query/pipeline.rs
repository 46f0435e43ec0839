//! The five pipeline stages.
//!
//! Each stage owns its input and returns a new buffer; a failing stage
//! returns `Err` and the caller's `?` skips every stage after it.

use super::QueryRequest;
use crate::engine::FeedEngine;
use crate::error::Result;
use crate::models::{round_dp, FeedId, LastValue, Point};
use crate::time::{format_time, TimeFormat, Timestamp};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;

/// Client-ready result of a data request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeedData {
    /// `[time, value]` pairs
    Series(Vec<(Timestamp, Option<f64>)>),
    /// Values only, for the `notime` format
    Values(Vec<Option<f64>>),
}

impl FeedData {
    pub fn len(&self) -> usize {
        match self {
            FeedData::Series(rows) => rows.len(),
            FeedData::Values(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        match self {
            FeedData::Series(rows) => rows.iter().map(|(_, value)| *value).collect(),
            FeedData::Values(values) => values.clone(),
        }
    }
}

/// Stage 1: stored points in epoch seconds.
pub async fn fetch_raw(engine: &dyn FeedEngine, feed: FeedId, req: &QueryRequest) -> Result<Vec<Point>> {
    engine.get_data_combined(feed, &req.engine_query()).await
}

/// Stage 2: folds buffered points into disk points.
///
/// With `gap_fill`, a buffered point only replaces a null disk point in the
/// same `interval` bucket; non-null disk values are never touched. Otherwise
/// buffered points are appended.
pub fn merge_buffer(mut disk: Vec<Point>, buffered: Vec<Point>, gap_fill: bool, interval: i64) -> Vec<Point> {
    if buffered.is_empty() {
        return disk;
    }
    if !gap_fill {
        disk.extend(buffered);
        return disk;
    }

    let bucket = |time: i64| {
        if interval > 0 {
            time.div_euclid(interval) * interval
        } else {
            time
        }
    };
    let index: HashMap<i64, Option<f64>> = buffered.iter().map(|p| (bucket(p.time), p.value)).collect();
    for point in disk.iter_mut().filter(|p| p.value.is_none()) {
        if let Some(value) = index.get(&point.time) {
            point.value = *value;
        }
    }
    disk
}

/// Stage 3: forward differences.
///
/// N points become N-1: each point takes `next - current`, or null when either
/// side is null. With `current` set, a null point whose bucket contains the
/// feed's last update is first replaced by the feed's last value.
pub fn delta(mut points: Vec<Point>, current: Option<LastValue>) -> Vec<Point> {
    for i in 0..points.len().saturating_sub(1) {
        if let Some(last) = current {
            let (before, after) = (points[i].time, points[i + 1].time);
            if points[i + 1].value.is_none() && last.time > before && last.time <= after {
                points[i + 1].value = last.value;
            }
        }
        points[i].value = match (points[i].value, points[i + 1].value) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        };
    }
    points.pop();
    points
}

/// Stage 4: rewrites times into the requested format.
pub fn transform_time(points: &[Point], format: TimeFormat, tz: Tz) -> Result<Vec<(Timestamp, Option<f64>)>> {
    points
        .iter()
        .map(|p| Ok((format_time(p.time, format, tz)?, p.value)))
        .collect()
}

/// Stage 5: rounding and final shape.
pub fn output(rows: Vec<(Timestamp, Option<f64>)>, format: TimeFormat, dp: Option<i32>) -> FeedData {
    let round = |value: Option<f64>| match dp {
        Some(dp) => value.map(|v| round_dp(v, dp)),
        None => value,
    };
    if format == TimeFormat::NoTime {
        FeedData::Values(rows.into_iter().map(|(_, value)| round(value)).collect())
    } else {
        FeedData::Series(rows.into_iter().map(|(time, value)| (time, round(value))).collect())
    }
}
