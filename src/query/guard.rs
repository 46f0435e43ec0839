//! Request guard: turns caller parameters into a validated [`QueryRequest`].

use super::{QueryParams, QueryRequest};
use crate::error::{Error, Result};
use crate::time::{convert_time, delta_mode_next_interval, parse_timezone, Interval, TimeFormat};
use chrono::{DateTime, Utc};

/// Requests are auto-sized to roughly this many points.
const AUTO_INTERVAL_POINTS: f64 = 800.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestGuard {
    max_datapoints: Option<u64>,
}

impl RequestGuard {
    pub fn new(max_datapoints: Option<u64>) -> Self {
        Self { max_datapoints }
    }

    /// Normalizes times and interval and enforces the request limits.
    ///
    /// CSV requests skip the delta end extension and the datapoint cap; they
    /// are streamed and never materialized.
    pub fn normalize(&self, params: &QueryParams, now: DateTime<Utc>) -> Result<QueryRequest> {
        let timezone = parse_timezone(&params.timezone)?;
        let timeformat = TimeFormat::parse(&params.timeformat)?;

        let start = convert_time(&params.start, timezone, now)?;
        let mut end = convert_time(&params.end, timezone, now)?;
        if end <= start {
            return Err(Error::Validation("Request end time before start time".to_string()));
        }

        let interval = match params.interval {
            Interval::Seconds(seconds) if seconds < 1 => {
                let auto = ((end - start) as f64 / AUTO_INTERVAL_POINTS).round() as i64;
                Interval::Seconds(auto.max(1))
            }
            interval => interval,
        };

        if params.delta && !params.csv {
            end = delta_mode_next_interval(end, interval, timezone)?;
        }

        if let (Some(max), Interval::Seconds(seconds), false) = (self.max_datapoints, interval, params.csv) {
            let requested = ((end - start) as f64 / seconds as f64).round() as u64;
            if requested > max {
                return Err(Error::LimitExceeded(format!(
                    "request datapoint limit reached ({}), increase request interval or reduce time range, requested datapoints = {}",
                    max, requested
                )));
            }
        }

        Ok(QueryRequest {
            feedid: params.feedid,
            start,
            end,
            interval,
            average: params.average,
            timezone,
            timeformat,
            csv: params.csv,
            skip_missing: params.skip_missing,
            limit_interval: params.limit_interval,
            delta: params.delta,
            dp: (params.dp != -1).then_some(params.dp),
        })
    }
}
