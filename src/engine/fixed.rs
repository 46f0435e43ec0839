//! Fixed-interval file engine.
//!
//! Each feed owns two files under the engine directory:
//! - `<id>.meta`: `u32` interval and `u32` start time, little-endian
//! - `<id>.dat`: one little-endian `f32` per interval slot, NaN for no sample
//!
//! Slot `n` holds the sample for `start_time + n * interval`. The data file is
//! always written contiguously, so a gap between the last slot and a new
//! post is padded explicitly.

use super::{sampling, DmyRow, EngineMeta, EngineOptions, EngineQuery, FeedEngine};
use crate::error::{Error, Result};
use crate::models::{FeedId, LastValue, PaddingMode, Point};
use crate::time::Interval;
use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use sha2::{Digest, Sha256};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

const SLOT_BYTES: u64 = 4;
const META_BYTES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FixedMeta {
    interval: i64,
    start_time: i64,
}

impl FixedMeta {
    fn decode(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() < META_BYTES {
            return Err(Error::Backend("Fixed-interval meta file is truncated".to_string()));
        }
        let interval = i64::from(bytes.get_u32_le());
        let start_time = i64::from(bytes.get_u32_le());
        if interval < 1 {
            return Err(Error::Backend("Fixed-interval meta file has a zero interval".to_string()));
        }
        Ok(Self { interval, start_time })
    }

    fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(META_BYTES);
        buf.put_u32_le(to_u32(self.interval, "interval")?);
        buf.put_u32_le(to_u32(self.start_time, "start time")?);
        Ok(buf)
    }

    /// Timestamp aligned down to the slot grid.
    fn align(&self, time: i64) -> i64 {
        time - time.rem_euclid(self.interval)
    }

    /// Slot containing `time`; negative before the start.
    fn slot_floor(&self, time: i64) -> i64 {
        (time - self.start_time).div_euclid(self.interval)
    }

    /// First slot at or after `time`.
    fn slot_ceil(&self, time: i64) -> i64 {
        (time - self.start_time + self.interval - 1).div_euclid(self.interval)
    }

    fn slot_time(&self, slot: u64) -> i64 {
        self.start_time + slot as i64 * self.interval
    }
}

fn to_u32(value: i64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Validation(format!("{} {} out of range", what, value)))
}

fn encode_slots(values: &[Option<f64>]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(values.len() * SLOT_BYTES as usize);
    for value in values {
        buf.put_f32_le(value.map_or(f32::NAN, |v| v as f32));
    }
    buf
}

fn decode_slots(mut bytes: &[u8]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(bytes.len() / SLOT_BYTES as usize);
    while bytes.remaining() >= SLOT_BYTES as usize {
        let value = bytes.get_f32_le();
        out.push((!value.is_nan()).then_some(f64::from(value)));
    }
    out
}

/// Slots loaded for a read, starting at slot `first`.
struct SlotWindow {
    meta: FixedMeta,
    first: i64,
    values: Vec<Option<f64>>,
}

impl SlotWindow {
    fn at(&self, time: i64) -> Option<f64> {
        if time < self.meta.start_time {
            return None;
        }
        let idx = self.meta.slot_floor(time) - self.first;
        usize::try_from(idx).ok().and_then(|i| self.values.get(i).copied().flatten())
    }

    fn mean(&self, start: i64, end: i64) -> Option<f64> {
        let lo = (self.meta.slot_ceil(start) - self.first).max(0);
        let hi = (self.meta.slot_ceil(end) - self.first).min(self.values.len() as i64);
        if hi <= lo {
            return None;
        }
        let (sum, count) = self.values[lo as usize..hi as usize]
            .iter()
            .flatten()
            .fold((0.0, 0u32), |(sum, count), v| (sum + v, count + 1));
        (count > 0).then(|| sum / f64::from(count))
    }
}

pub struct FixedIntervalEngine {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FixedIntervalEngine {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn meta_path(&self, feed: FeedId) -> PathBuf {
        self.dir.join(format!("{}.meta", feed))
    }

    fn data_path(&self, feed: FeedId) -> PathBuf {
        self.dir.join(format!("{}.dat", feed))
    }

    async fn read_meta(&self, feed: FeedId) -> Result<FixedMeta> {
        match fs::read(self.meta_path(feed)).await {
            Ok(bytes) => FixedMeta::decode(&bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(format!(
                "No fixed-interval data for feed {}",
                feed
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_meta(&self, feed: FeedId, meta: &FixedMeta) -> Result<()> {
        fs::write(self.meta_path(feed), meta.encode()?).await?;
        Ok(())
    }

    async fn npoints(&self, feed: FeedId) -> Result<u64> {
        match fs::metadata(self.data_path(feed)).await {
            Ok(m) => Ok(m.len() / SLOT_BYTES),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_raw(&self, feed: FeedId, first: u64, count: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if count == 0 {
            return Ok(buf);
        }
        let mut file = fs::File::open(self.data_path(feed)).await?;
        file.seek(SeekFrom::Start(first * SLOT_BYTES)).await?;
        file.take(count * SLOT_BYTES).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn read_slots(&self, feed: FeedId, first: u64, count: u64) -> Result<Vec<Option<f64>>> {
        Ok(decode_slots(&self.read_raw(feed, first, count).await?))
    }

    async fn write_slots(&self, feed: FeedId, first: u64, values: &[Option<f64>]) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.data_path(feed))
            .await?;
        file.seek(SeekFrom::Start(first * SLOT_BYTES)).await?;
        file.write_all(&encode_slots(values)).await?;
        file.flush().await?;
        Ok(())
    }

    /// Loads the slots needed to answer reads between `lo` and `hi`.
    async fn load_window(&self, feed: FeedId, meta: FixedMeta, npoints: u64, lo: i64, hi: i64) -> Result<SlotWindow> {
        let first = meta.slot_floor(lo).clamp(0, npoints as i64);
        let last = meta.slot_ceil(hi).clamp(0, npoints as i64);
        let values = if last > first {
            self.read_slots(feed, first as u64, (last - first) as u64).await?
        } else {
            Vec::new()
        };
        Ok(SlotWindow { meta, first, values })
    }

    /// Writes `values` starting at `start`, padding with nulls from the end
    /// of the file. Caller holds the write lock.
    async fn write_block(&self, feed: FeedId, start: i64, interval: i64, values: &[Option<f64>]) -> Result<()> {
        let mut meta = self.read_meta(feed).await?;
        if interval != meta.interval {
            return Err(Error::Validation(format!(
                "Interval mismatch: feed uses {}s, upload uses {}s",
                meta.interval, interval
            )));
        }
        let npoints = self.npoints(feed).await?;
        let aligned = meta.align(start);
        if npoints == 0 {
            meta.start_time = aligned;
            self.write_meta(feed, &meta).await?;
        }
        if aligned < meta.start_time {
            return Err(Error::Validation(format!(
                "Time {} is before the feed start {}",
                start, meta.start_time
            )));
        }
        let pos = meta.slot_floor(aligned) as u64;
        if pos > npoints {
            let mut block = vec![None; (pos - npoints) as usize];
            block.extend_from_slice(values);
            self.write_slots(feed, npoints, &block).await
        } else {
            self.write_slots(feed, pos, values).await
        }
    }

    async fn post_locked(&self, feed: FeedId, time: i64, value: f64, padding: Option<PaddingMode>) -> Result<f64> {
        let mut meta = self.read_meta(feed).await?;
        let npoints = self.npoints(feed).await?;
        let aligned = meta.align(time);
        if npoints == 0 {
            meta.start_time = aligned;
            self.write_meta(feed, &meta).await?;
        }
        if aligned < meta.start_time {
            return Err(Error::Validation(format!(
                "Time {} is before the feed start {}",
                time, meta.start_time
            )));
        }

        let pos = meta.slot_floor(aligned) as u64;
        if pos <= npoints {
            self.write_slots(feed, pos, &[Some(value)]).await?;
            return Ok(value);
        }

        let gap = pos - npoints;
        let last = match padding {
            Some(PaddingMode::Join) if npoints > 0 => {
                self.read_slots(feed, npoints - 1, 1).await?.first().copied().flatten()
            }
            _ => None,
        };
        let mut block: Vec<Option<f64>> = (1..=gap)
            .map(|k| last.map(|l| l + (value - l) * k as f64 / (gap + 1) as f64))
            .collect();
        block.push(Some(value));
        debug!(feed, gap, "padding fixed-interval feed");
        self.write_slots(feed, npoints, &block).await?;
        Ok(value)
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl FeedEngine for FixedIntervalEngine {
    fn name(&self) -> &'static str {
        "fixed_interval"
    }

    async fn create(&self, feed: FeedId, options: &EngineOptions) -> Result<()> {
        let interval = options.interval.filter(|i| *i > 0).ok_or_else(|| {
            Error::Validation("Fixed-interval feeds need a positive interval".to_string())
        })?;
        let _guard = self.write_lock.lock().await;
        if fs::try_exists(self.meta_path(feed)).await? {
            return Err(Error::Validation(format!(
                "Fixed-interval data for feed {} already exists",
                feed
            )));
        }
        self.write_meta(feed, &FixedMeta { interval, start_time: 0 }).await?;
        fs::write(self.data_path(feed), b"").await?;
        Ok(())
    }

    async fn delete(&self, feed: FeedId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        remove_if_exists(&self.meta_path(feed)).await?;
        remove_if_exists(&self.data_path(feed)).await
    }

    async fn trim(&self, feed: FeedId, start: i64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut meta = self.read_meta(feed).await?;
        let npoints = self.npoints(feed).await?;
        let aligned = meta.align(start);
        if npoints == 0 || aligned <= meta.start_time {
            return Ok(());
        }
        let pos = meta.slot_floor(aligned) as u64;
        let kept = if pos < npoints {
            self.read_raw(feed, pos, npoints - pos).await?
        } else {
            Vec::new()
        };
        fs::write(self.data_path(feed), kept).await?;
        meta.start_time = if pos < npoints { aligned } else { 0 };
        self.write_meta(feed, &meta).await
    }

    async fn clear(&self, feed: FeedId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut meta = self.read_meta(feed).await?;
        meta.start_time = 0;
        fs::write(self.data_path(feed), b"").await?;
        self.write_meta(feed, &meta).await
    }

    async fn post(&self, feed: FeedId, time: i64, value: f64, padding: Option<PaddingMode>) -> Result<f64> {
        let _guard = self.write_lock.lock().await;
        self.post_locked(feed, time, value, padding).await
    }

    async fn post_multiple(&self, feed: FeedId, points: &[(i64, f64)], padding: Option<PaddingMode>) -> Result<()> {
        let mut sorted = points.to_vec();
        sorted.sort_by_key(|(time, _)| *time);
        let _guard = self.write_lock.lock().await;
        for (time, value) in sorted {
            self.post_locked(feed, time, value, padding).await?;
        }
        Ok(())
    }

    async fn get_value(&self, feed: FeedId, time: i64) -> Result<Option<f64>> {
        let meta = self.read_meta(feed).await?;
        let npoints = self.npoints(feed).await?;
        let pos = meta.slot_floor(time);
        if time < meta.start_time || pos < 0 || pos as u64 >= npoints {
            return Ok(None);
        }
        Ok(self.read_slots(feed, pos as u64, 1).await?.first().copied().flatten())
    }

    async fn get_data_combined(&self, feed: FeedId, query: &EngineQuery) -> Result<Vec<Point>> {
        let meta = self.read_meta(feed).await?;
        let npoints = self.npoints(feed).await?;

        let mut query = query.clone();
        if let Interval::Seconds(i) = query.interval {
            if i <= 0 || (query.limit_interval && i < meta.interval) {
                query.interval = Interval::Seconds(meta.interval);
            }
        }
        let buckets = sampling::buckets(&query)?;
        let (Some(first), Some(last)) = (buckets.first(), buckets.last()) else {
            return Ok(Vec::new());
        };
        // unwritten file: every bucket is a gap
        if npoints == 0 {
            if query.skip_missing {
                return Ok(Vec::new());
            }
            return Ok(buckets.iter().map(|(start, _)| Point::gap(*start)).collect());
        }
        let window = self.load_window(feed, meta, npoints, first.0, last.1).await?;

        let mut out = Vec::with_capacity(buckets.len());
        for (start, end) in buckets {
            let value = if query.average && end - start > meta.interval {
                window.mean(start, end)
            } else {
                window.at(start)
            };
            if value.is_none() && query.skip_missing {
                continue;
            }
            out.push(Point::new(start, value));
        }
        Ok(out)
    }

    async fn get_data_dmy_time_of_day(&self, feed: FeedId, query: &EngineQuery, split: &[f64]) -> Result<Vec<DmyRow>> {
        let meta = self.read_meta(feed).await?;
        let npoints = self.npoints(feed).await?;
        let (lo, hi) = sampling::window(query)?;
        let window = self.load_window(feed, meta, npoints, lo, hi).await?;
        sampling::time_of_day_rows(query, split, |time| window.at(time))
    }

    async fn get_meta(&self, feed: FeedId) -> Result<EngineMeta> {
        let meta = self.read_meta(feed).await?;
        let npoints = self.npoints(feed).await?;
        Ok(EngineMeta {
            start_time: Some(meta.start_time),
            end_time: (npoints > 0).then(|| meta.slot_time(npoints - 1)),
            interval: Some(meta.interval),
            npoints: Some(npoints),
        })
    }

    async fn get_feed_size(&self, feed: FeedId) -> Result<u64> {
        let mut size = 0;
        for path in [self.meta_path(feed), self.data_path(feed)] {
            match fs::metadata(&path).await {
                Ok(m) => size += m.len(),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(size)
    }

    async fn lastvalue(&self, feed: FeedId) -> Result<Option<LastValue>> {
        let meta = self.read_meta(feed).await?;
        let npoints = self.npoints(feed).await?;
        if npoints == 0 {
            return Ok(None);
        }
        let value = self.read_slots(feed, npoints - 1, 1).await?.first().copied().flatten();
        Ok(Some(LastValue::new(meta.slot_time(npoints - 1), value)))
    }

    async fn export(&self, feed: FeedId, start: i64) -> Result<Vec<Point>> {
        let meta = self.read_meta(feed).await?;
        let npoints = self.npoints(feed).await?;
        let first = meta.slot_ceil(start).clamp(0, npoints as i64) as u64;
        let values = self.read_slots(feed, first, npoints - first).await?;
        Ok(values
            .into_iter()
            .enumerate()
            .map(|(idx, value)| Point::new(meta.slot_time(first + idx as u64), value))
            .collect())
    }

    async fn upload_fixed_interval(&self, feed: FeedId, start: i64, interval: i64, values: &[Option<f64>]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_block(feed, start, interval, values).await
    }

    async fn get_sha256sum(&self, feed: FeedId, npoints: u64) -> Result<String> {
        let available = self.npoints(feed).await?;
        let bytes = self.read_raw(feed, 0, npoints.min(available)).await?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    async fn sync(&self, feed: FeedId, payload: &[u8]) -> Result<()> {
        if payload.len() < 8 || (payload.len() - 8) % SLOT_BYTES as usize != 0 {
            return Err(Error::Integrity("Invalid frame length".to_string()));
        }
        let mut buf = payload;
        let interval = i64::from(buf.get_u32_le());
        let start = i64::from(buf.get_u32_le());
        let values = decode_slots(buf);
        let _guard = self.write_lock.lock().await;
        self.write_block(feed, start, interval, &values).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn engine_with_feed(dir: &Path, interval: i64) -> FixedIntervalEngine {
        let engine = FixedIntervalEngine::new(dir.join("fixed")).unwrap();
        let options = EngineOptions {
            interval: Some(interval),
            ..EngineOptions::default()
        };
        engine.create(1, &options).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_post_and_read_grid() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_feed(dir.path(), 10).await;

        engine.post(1, 1003, 1.5, None).await.unwrap();
        engine.post(1, 1010, 2.5, None).await.unwrap();
        engine.post(1, 1040, 4.0, None).await.unwrap();

        let meta = engine.get_meta(1).await.unwrap();
        assert_eq!(meta.start_time, Some(1000));
        assert_eq!(meta.npoints, Some(5));

        let query = EngineQuery::new(1000, 1040, Interval::Seconds(10));
        let points = engine.get_data_combined(1, &query).await.unwrap();
        assert_eq!(
            points,
            vec![
                Point::sample(1000, 1.5),
                Point::sample(1010, 2.5),
                Point::gap(1020),
                Point::gap(1030),
                Point::sample(1040, 4.0),
            ]
        );

        let mut skipping = query.clone();
        skipping.skip_missing = true;
        assert_eq!(engine.get_data_combined(1, &skipping).await.unwrap().len(), 3);
        assert_eq!(engine.lastvalue(1).await.unwrap(), Some(LastValue::new(1040, Some(4.0))));
    }

    #[tokio::test]
    async fn test_join_padding_interpolates() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_feed(dir.path(), 10).await;

        engine.post(1, 0, 0.0, None).await.unwrap();
        engine.post(1, 40, 8.0, Some(PaddingMode::Join)).await.unwrap();

        let values: Vec<_> = engine.export(1, 0).await.unwrap().into_iter().map(|p| p.value).collect();
        assert_eq!(values, vec![Some(0.0), Some(2.0), Some(4.0), Some(6.0), Some(8.0)]);
    }

    #[tokio::test]
    async fn test_average_over_wider_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_feed(dir.path(), 10).await;
        engine
            .post_multiple(1, &[(0, 1.0), (10, 3.0), (20, 5.0), (30, 7.0)], None)
            .await
            .unwrap();

        let mut query = EngineQuery::new(0, 30, Interval::Seconds(20));
        query.average = true;
        let points = engine.get_data_combined(1, &query).await.unwrap();
        assert_eq!(points, vec![Point::sample(0, 2.0), Point::sample(20, 6.0)]);

        let mut limited = EngineQuery::new(0, 30, Interval::Seconds(5));
        limited.limit_interval = true;
        assert_eq!(engine.get_data_combined(1, &limited).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_trim_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_feed(dir.path(), 10).await;
        engine
            .post_multiple(1, &[(0, 1.0), (10, 2.0), (20, 3.0)], None)
            .await
            .unwrap();

        engine.trim(1, 10).await.unwrap();
        let exported = engine.export(1, 0).await.unwrap();
        assert_eq!(exported, vec![Point::sample(10, 2.0), Point::sample(20, 3.0)]);

        engine.clear(1).await.unwrap();
        assert_eq!(engine.lastvalue(1).await.unwrap(), None);
        assert_eq!(engine.get_meta(1).await.unwrap().npoints, Some(0));
    }

    #[tokio::test]
    async fn test_sync_payload_and_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_feed(dir.path(), 10).await;

        let mut payload = BytesMut::new();
        payload.put_u32_le(10);
        payload.put_u32_le(100);
        payload.put_f32_le(1.0);
        payload.put_f32_le(f32::NAN);
        payload.put_f32_le(3.0);
        engine.sync(1, &payload).await.unwrap();

        assert_eq!(engine.get_value(1, 125).await.unwrap(), Some(3.0));
        assert_eq!(engine.get_value(1, 110).await.unwrap(), None);

        let expected = hex::encode(Sha256::digest(&payload[8..]));
        assert_eq!(engine.get_sha256sum(1, 3).await.unwrap(), expected);

        payload.put_u8(0);
        assert!(matches!(engine.sync(1, &payload).await, Err(Error::Integrity(_))));
    }

    #[tokio::test]
    async fn test_create_requires_interval() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FixedIntervalEngine::new(dir.path()).unwrap();
        let err = engine.create(7, &EngineOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
