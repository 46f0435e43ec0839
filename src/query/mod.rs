//! Data requests.
//!
//! A request flows through the [`RequestGuard`] and then the five pipeline
//! stages: fetch, buffer merge, delta, time transform and output. CSV
//! requests skip the pipeline and stream straight from the engine.

pub mod guard;
pub mod pipeline;

pub use guard::RequestGuard;
pub use pipeline::FeedData;

use crate::engine::{csv, EngineQuery};
use crate::error::{Error, Result};
use crate::feeds::Feeds;
use crate::models::{EngineKind, FeedId, FeedRecord, Point};
use crate::time::{convert_time, format_time, parse_timezone, Interval, TimeArg, TimeFormat, Timestamp};
use chrono::Utc;
use chrono_tz::Tz;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::io::Write;

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_timeformat() -> String {
    "unixms".to_string()
}

fn default_interval() -> Interval {
    Interval::Seconds(0)
}

fn default_dp() -> i32 {
    -1
}

/// Parameters of a data request as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    pub feedid: FeedId,
    pub start: TimeArg,
    pub end: TimeArg,
    /// Seconds (non-positive means auto-size) or a calendar bucket
    #[serde(default = "default_interval")]
    pub interval: Interval,
    #[serde(default)]
    pub average: bool,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_timeformat")]
    pub timeformat: String,
    #[serde(default)]
    pub csv: bool,
    #[serde(default)]
    pub skip_missing: bool,
    #[serde(default)]
    pub limit_interval: bool,
    #[serde(default)]
    pub delta: bool,
    /// Decimal places; -1 disables rounding
    #[serde(default = "default_dp")]
    pub dp: i32,
}

impl QueryParams {
    pub fn new(feedid: FeedId, start: i64, end: i64, interval: Interval) -> Self {
        Self {
            feedid,
            start: TimeArg::from(start),
            end: TimeArg::from(end),
            interval,
            average: false,
            timezone: default_timezone(),
            timeformat: default_timeformat(),
            csv: false,
            skip_missing: false,
            limit_interval: false,
            delta: false,
            dp: default_dp(),
        }
    }
}

/// A validated request. Times are epoch seconds and the interval is
/// positive or a calendar bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub feedid: FeedId,
    pub start: i64,
    pub end: i64,
    pub interval: Interval,
    pub average: bool,
    pub timezone: Tz,
    pub timeformat: TimeFormat,
    pub csv: bool,
    pub skip_missing: bool,
    pub limit_interval: bool,
    pub delta: bool,
    pub dp: Option<i32>,
}

impl QueryRequest {
    pub fn engine_query(&self) -> EngineQuery {
        EngineQuery {
            start: self.start,
            end: self.end,
            interval: self.interval,
            average: self.average,
            timezone: self.timezone,
            skip_missing: self.skip_missing,
            limit_interval: self.limit_interval,
        }
    }
}

impl Feeds {
    pub fn request_guard(&self) -> RequestGuard {
        RequestGuard::new(self.settings().max_datapoints)
    }

    /// Runs a data request through the guard and the pipeline.
    pub async fn get_data(&self, params: &QueryParams) -> Result<FeedData> {
        if params.csv {
            return Err(Error::Validation("CSV requests must be streamed".to_string()));
        }
        let record = self.get(params.feedid).await?;
        let req = self.request_guard().normalize(params, Utc::now())?;
        let points = self.collect_points(&record, &req).await?;
        let rows = pipeline::transform_time(&points, req.timeformat, req.timezone)?;
        Ok(pipeline::output(rows, req.timeformat, req.dp))
    }

    /// Stages 1 to 3, leaving times in epoch seconds.
    async fn collect_points(&self, record: &FeedRecord, req: &QueryRequest) -> Result<Vec<Point>> {
        let engine = self.engine_for(record);
        let disk = pipeline::fetch_raw(engine.backend(), record.id, req).await?;

        let merged = match (self.buffer(), req.interval) {
            (Some(buffer), Interval::Seconds(interval)) if !req.average && !req.csv => {
                let mut buffer_query = req.engine_query();
                if req.skip_missing {
                    if let Some(last) = disk.last() {
                        buffer_query.start = last.time;
                    }
                }
                let buffered = buffer.backend().get_data_combined(record.id, &buffer_query).await?;
                let gap_fill = !req.skip_missing && record.kind().map_or(false, |kind| kind.is_file_backed());
                pipeline::merge_buffer(disk, buffered, gap_fill, interval)
            }
            _ => disk,
        };

        if !req.delta {
            return Ok(merged);
        }
        let current = if req.timeformat == TimeFormat::NoTime {
            None
        } else {
            self.get_timevalue(record.id).await?
        };
        Ok(pipeline::delta(merged, current))
    }

    /// CSV form of [`Feeds::get_data`]: rows go straight from the engine to
    /// `out`. Returns the number of rows written.
    pub async fn stream_csv(&self, params: &QueryParams, out: &mut (dyn Write + Send)) -> Result<u64> {
        let record = self.get(params.feedid).await?;
        let params = QueryParams {
            csv: true,
            ..params.clone()
        };
        let req = self.request_guard().normalize(&params, Utc::now())?;
        self.engine_for(&record)
            .backend()
            .write_csv(record.id, &req.engine_query(), req.timeformat, &self.settings().csv, out)
            .await
    }

    /// Runs `params` for every feed in `feeds` and writes one CSV with a time
    /// column and a value column per feed.
    pub async fn write_csv_multi(
        &self,
        feeds: &[FeedId],
        params: &QueryParams,
        out: &mut (dyn Write + Send),
    ) -> Result<u64> {
        let now = Utc::now();
        let requests = feeds.iter().map(|&feedid| async move {
            let params = QueryParams {
                feedid,
                csv: false,
                ..params.clone()
            };
            let record = self.get(feedid).await?;
            let req = self.request_guard().normalize(&params, now)?;
            let points = self.collect_points(&record, &req).await?;
            Ok::<_, Error>(((req.timeformat, req.timezone), points))
        });
        let results = try_join_all(requests).await?;

        let (format, tz) = results.first().map_or((TimeFormat::UnixMs, Tz::UTC), |(format, _)| *format);
        let series: Vec<Vec<Point>> = results.into_iter().map(|(_, points)| points).collect();
        csv::write_aligned(out, &series, &self.settings().csv, format, tz)
    }

    /// Values at the `split` hours of each calendar bucket, for fixed-interval
    /// and relational feeds.
    pub async fn get_data_dmy_time_of_day(
        &self,
        id: FeedId,
        start: &TimeArg,
        end: &TimeArg,
        interval: Interval,
        timezone: &str,
        timeformat: &str,
        split: &[f64],
    ) -> Result<Vec<(Timestamp, Vec<Option<f64>>)>> {
        let record = self.get(id).await?;
        let tz = parse_timezone(timezone)?;
        let format = TimeFormat::parse(timeformat)?;
        let now = Utc::now();
        let start = convert_time(start, tz, now)?;
        let end = convert_time(end, tz, now)?;
        if end <= start {
            return Err(Error::Validation("Request end time before start time".to_string()));
        }
        match record.kind() {
            Some(kind) if kind == EngineKind::FixedInterval || kind.is_relational() => {}
            _ => {
                return Err(Error::Unsupported(
                    "This request is only supported by fixed_interval and relational engines".to_string(),
                ))
            }
        }

        let mut query = EngineQuery::new(start, end, interval);
        query.timezone = tz;
        let rows = self
            .engine_for(&record)
            .backend()
            .get_data_dmy_time_of_day(id, &query, split)
            .await?;
        rows.into_iter()
            .map(|row| Ok((format_time(row.time, format, tz)?, row.values)))
            .collect()
    }
}
