//! Storage engines for feed data.
//!
//! This module provides one engine per backend kind:
//! - `fixed`: fixed-interval file engine (one `f32` slot per interval)
//! - `variable`: variable-interval file engine (`(time, value)` records)
//! - `relational`: DuckDB table per feed, on disk or in memory
//! - `virtual_feed`: read-only feeds computed by an external source
//! - `buffer`: low-latency write buffer merged into reads
//! - `disabled`: inert placeholder handed out for invalid kinds
//!
//! Every engine implements [`FeedEngine`]. Engines are shared across feeds
//! by the [`EngineRegistry`], so every operation takes the feed id.

pub mod buffer;
pub mod csv;
pub mod disabled;
pub mod fixed;
pub mod registry;
pub mod relational;
pub mod sampling;
pub mod variable;
pub mod virtual_feed;

use self::{
    buffer::BufferEngine, disabled::DisabledEngine, fixed::FixedIntervalEngine,
    relational::RelationalEngine, variable::VariableIntervalEngine, virtual_feed::VirtualEngine,
};
use crate::error::{Error, Result};
use crate::models::{FeedId, LastValue, PaddingMode, Point};
use crate::time::{Interval, TimeFormat};
use async_trait::async_trait;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

pub use self::csv::CsvSettings;
pub use self::registry::EngineRegistry;
pub use self::sampling::DmyRow;
pub use self::virtual_feed::VirtualSource;

/// Settings the registry hands to engines it constructs.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Root of the `fixed/` and `variable/` data directories
    pub datadir: PathBuf,
    /// DuckDB database for relational-table feeds
    pub relational_connection: String,
    /// Per-feed bound of the write buffer
    pub buffer_max_points: usize,
}

/// Engine-specific creation options. Only the options meaningful to the
/// feed's kind survive filtering in the facade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Slot width in seconds (fixed-interval)
    #[serde(default)]
    pub interval: Option<i64>,
    /// Remove existing rows from the backing table (relational)
    #[serde(default)]
    pub empty: bool,
}

/// Range read parameters passed to `get_data_combined`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineQuery {
    pub start: i64,
    pub end: i64,
    pub interval: Interval,
    pub average: bool,
    pub timezone: Tz,
    pub skip_missing: bool,
    /// Never sample finer than the feed's native interval
    pub limit_interval: bool,
}

impl EngineQuery {
    pub fn new(start: i64, end: i64, interval: Interval) -> Self {
        Self {
            start,
            end,
            interval,
            average: false,
            timezone: Tz::UTC,
            skip_missing: false,
            limit_interval: false,
        }
    }
}

/// Storage statistics of one feed. Fields an engine cannot report are
/// omitted when serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npoints: Option<u64>,
}

pub(crate) fn unsupported(engine: &str, op: &str) -> Error {
    Error::Unsupported(format!("{} does not support {}", engine, op))
}

/// Capability set shared by all backend kinds.
///
/// Every capability has a default that reports [`Error::Unsupported`], so an
/// engine implements only what its storage can do.
#[async_trait]
pub trait FeedEngine: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Provision storage for a new feed.
    async fn create(&self, _feed: FeedId, _options: &EngineOptions) -> Result<()> {
        Err(unsupported(self.name(), "create"))
    }

    /// Remove all storage of a feed.
    async fn delete(&self, _feed: FeedId) -> Result<()> {
        Err(unsupported(self.name(), "delete"))
    }

    /// Drop every sample before `start`.
    async fn trim(&self, _feed: FeedId, _start: i64) -> Result<()> {
        Err(unsupported(self.name(), "trim"))
    }

    /// Drop every sample, keeping the feed provisioned.
    async fn clear(&self, _feed: FeedId) -> Result<()> {
        Err(unsupported(self.name(), "clear"))
    }

    /// Store one sample and return the stored value.
    async fn post(
        &self,
        _feed: FeedId,
        _time: i64,
        _value: f64,
        _padding: Option<PaddingMode>,
    ) -> Result<f64> {
        Err(unsupported(self.name(), "post"))
    }

    /// Store a batch of samples in any order.
    async fn post_multiple(
        &self,
        _feed: FeedId,
        _points: &[(i64, f64)],
        _padding: Option<PaddingMode>,
    ) -> Result<()> {
        Err(unsupported(self.name(), "post_multiple"))
    }

    async fn get_value(&self, _feed: FeedId, _time: i64) -> Result<Option<f64>> {
        Err(unsupported(self.name(), "get_value"))
    }

    /// Read `[start, end]` sampled at the query interval. Timestamps are
    /// always epoch seconds.
    async fn get_data_combined(&self, _feed: FeedId, _query: &EngineQuery) -> Result<Vec<Point>> {
        Err(unsupported(self.name(), "get_data_combined"))
    }

    async fn get_data_dmy_time_of_day(
        &self,
        _feed: FeedId,
        _query: &EngineQuery,
        _split: &[f64],
    ) -> Result<Vec<DmyRow>> {
        Err(unsupported(self.name(), "get_data_DMY_time_of_day"))
    }

    async fn get_meta(&self, _feed: FeedId) -> Result<EngineMeta> {
        Err(unsupported(self.name(), "get_meta"))
    }

    async fn get_feed_size(&self, _feed: FeedId) -> Result<u64> {
        Err(unsupported(self.name(), "get_feed_size"))
    }

    async fn lastvalue(&self, _feed: FeedId) -> Result<Option<LastValue>> {
        Err(unsupported(self.name(), "lastvalue"))
    }

    /// Every stored sample at or after `start`.
    async fn export(&self, _feed: FeedId, _start: i64) -> Result<Vec<Point>> {
        Err(unsupported(self.name(), "export"))
    }

    async fn upload_fixed_interval(
        &self,
        _feed: FeedId,
        _start: i64,
        _interval: i64,
        _values: &[Option<f64>],
    ) -> Result<()> {
        Err(unsupported(self.name(), "upload_fixed_interval"))
    }

    async fn upload_variable_interval(&self, _feed: FeedId, _points: &[(i64, f64)]) -> Result<()> {
        Err(unsupported(self.name(), "upload_variable_interval"))
    }

    /// Hex SHA-256 of the first `npoints` stored samples.
    async fn get_sha256sum(&self, _feed: FeedId, _npoints: u64) -> Result<String> {
        Err(unsupported(self.name(), "get_sha256sum"))
    }

    /// Apply the payload of one sync frame (the bytes after its header).
    async fn sync(&self, _feed: FeedId, _payload: &[u8]) -> Result<()> {
        Err(unsupported(self.name(), "sync"))
    }

    async fn delete_data_point(&self, _feed: FeedId, _time: i64) -> Result<()> {
        Err(unsupported(self.name(), "delete_data_point"))
    }

    async fn delete_data_range(&self, _feed: FeedId, _start: i64, _end: i64) -> Result<()> {
        Err(unsupported(self.name(), "delete_data_range"))
    }

    /// Stream `[start, end]` as CSV rows. Returns the number of rows written.
    async fn write_csv(
        &self,
        feed: FeedId,
        query: &EngineQuery,
        format: TimeFormat,
        settings: &CsvSettings,
        out: &mut (dyn Write + Send),
    ) -> Result<u64> {
        let points = self.get_data_combined(feed, query).await?;
        csv::write_points(out, &points, settings, format, query.timezone)
    }
}

/// Closed set of engine implementations, one variant per storage strategy.
pub enum Engine {
    FixedInterval(FixedIntervalEngine),
    VariableInterval(VariableIntervalEngine),
    Relational(RelationalEngine),
    Virtual(VirtualEngine),
    WriteBuffer(BufferEngine),
    Disabled(DisabledEngine),
}

impl Engine {
    /// The engine's capability set.
    pub fn backend(&self) -> &dyn FeedEngine {
        self.as_ref()
    }

    pub fn as_buffer(&self) -> Option<&BufferEngine> {
        match self {
            Engine::WriteBuffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Engine::Disabled(_))
    }
}

impl AsRef<dyn FeedEngine> for Engine {
    fn as_ref(&self) -> &(dyn FeedEngine + 'static) {
        match self {
            Engine::FixedInterval(engine) => engine,
            Engine::VariableInterval(engine) => engine,
            Engine::Relational(engine) => engine,
            Engine::Virtual(engine) => engine,
            Engine::WriteBuffer(engine) => engine,
            Engine::Disabled(engine) => engine,
        }
    }
}
