//! Ingestion: single and bulk posts, uploads and buffer flushing.
//!
//! Every successful write finishes by moving the feed's last time/value
//! forward in the metadata store and cache.

pub mod sync;

pub use sync::{FrameReader, SyncedFeed};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::feeds::Feeds;
use crate::models::{EngineKind, FeedField, FeedId, PaddingMode};
use tracing::{debug, warn};

/// Batches above this size go to the engine's bulk write when it has one.
const BULK_THRESHOLD: usize = 10;

impl Feeds {
    /// Stores one sample. `time` defaults to `update_time`. With the write
    /// buffer enabled the sample is buffered instead of written.
    pub async fn post(
        &self,
        id: FeedId,
        update_time: i64,
        time: Option<i64>,
        value: f64,
        padding: Option<PaddingMode>,
    ) -> Result<f64> {
        let record = self.get(id).await?;
        let time = time.unwrap_or(update_time);
        debug!(feed = id, update_time, time, value, "post");

        let buffer = self.buffer();
        match (buffer.as_deref().and_then(Engine::as_buffer), record.kind()) {
            (Some(buffer), Some(kind)) => {
                buffer.post_buffered(id, kind, update_time, time, value, padding);
            }
            _ => {
                self.engine_for(&record).backend().post(id, time, value, padding).await?;
            }
        }

        self.set_timevalue(id, update_time, Some(value)).await?;
        Ok(value)
    }

    /// Stores a batch of `(time, value)` samples. The last value only moves
    /// when the batch's final sample is not older than it.
    pub async fn post_multiple(&self, id: FeedId, points: &[(i64, f64)], padding: Option<PaddingMode>) -> Result<()> {
        let record = self.get(id).await?;
        let Some(&(last_time, last_value)) = points.last() else {
            return Err(Error::Validation("Data empty".to_string()));
        };

        let engine = self.engine_for(&record);
        let bulk = record.kind().map_or(false, EngineKind::is_file_backed) && points.len() > BULK_THRESHOLD;
        if bulk {
            engine.backend().post_multiple(id, points, padding).await?;
        } else {
            for &(time, value) in points {
                engine.backend().post(id, time, value, padding).await?;
            }
        }

        let current = self.get_timevalue(id).await?;
        if current.map_or(true, |current| last_time >= current.time) {
            self.set_timevalue(id, last_time, Some(last_value)).await?;
        }
        Ok(())
    }

    /// Replaces a block of a fixed-interval feed.
    pub async fn upload_fixed_interval(
        &self,
        id: FeedId,
        start: i64,
        interval: i64,
        values: &[Option<f64>],
    ) -> Result<()> {
        let record = self.get(id).await?;
        if record.kind() != Some(EngineKind::FixedInterval) {
            return Err(Error::Unsupported("Feed upload not supported for this engine".to_string()));
        }
        let engine = self.engine_for(&record);
        engine.backend().upload_fixed_interval(id, start, interval, values).await?;
        self.refresh_lastvalue(id, &engine).await
    }

    /// Merges samples into a variable-interval feed.
    pub async fn upload_variable_interval(&self, id: FeedId, points: &[(i64, f64)]) -> Result<()> {
        let record = self.get(id).await?;
        if record.kind() != Some(EngineKind::VariableInterval) {
            return Err(Error::Unsupported("Feed upload not supported for this engine".to_string()));
        }
        let engine = self.engine_for(&record);
        engine.backend().upload_variable_interval(id, points).await?;
        self.refresh_lastvalue(id, &engine).await
    }

    /// Copies the engine's last sample into the metadata.
    pub(crate) async fn refresh_lastvalue(&self, id: FeedId, engine: &Engine) -> Result<()> {
        if let Some(last) = engine.backend().lastvalue(id).await? {
            self.write_fields(
                id,
                &[FeedField::LastValue {
                    time: last.time,
                    value: last.value,
                }],
            )
            .await?;
        }
        Ok(())
    }

    /// Moves a feed's buffered samples into its backend. On failure the
    /// samples go back into the buffer. Returns the number of samples moved.
    pub async fn flush_buffer(&self, id: FeedId) -> Result<usize> {
        let Some(engine) = self.buffer() else {
            return Ok(0);
        };
        let Some(buffer) = engine.as_buffer() else {
            return Ok(0);
        };
        let Some(buffered) = buffer.drain(id) else {
            return Ok(0);
        };

        let points: Vec<(i64, f64)> = buffered.points.iter().map(|(t, v)| (*t, *v)).collect();
        let backend = self.registry().get(buffered.backend);
        if let Err(e) = backend.backend().post_multiple(id, &points, buffered.padding).await {
            warn!("Flush of feed {} failed, re-buffering {} points: {}", id, points.len(), e);
            for (time, value) in &points {
                buffer.post_buffered(id, buffered.backend, buffered.update_time, *time, *value, buffered.padding);
            }
            return Err(e);
        }
        if let Err(e) = self.update_feed_size(id).await {
            warn!("Could not size feed {} after flush: {}", id, e);
        }
        Ok(points.len())
    }

    /// Flushes every feed with buffered samples. Returns the total moved.
    pub async fn flush_all_buffers(&self) -> Result<usize> {
        let Some(engine) = self.buffer() else {
            return Ok(0);
        };
        let active = engine.as_buffer().map(|buffer| buffer.active_feeds()).unwrap_or_default();
        let mut total = 0;
        for id in active {
            total += self.flush_buffer(id).await?;
        }
        Ok(total)
    }
}
