//! Variable-interval file engine.
//!
//! Each feed is a single `<id>.dat` file of 8-byte records, a little-endian
//! `u32` time followed by an `f32` value, kept in ascending time order.
//! In-order posts append; a post at the last timestamp overwrites it; anything
//! else rewrites the file through a temporary copy.

use super::{sampling, EngineMeta, EngineOptions, EngineQuery, FeedEngine};
use crate::error::{Error, Result};
use crate::models::{FeedId, LastValue, PaddingMode, Point};
use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

const RECORD_BYTES: u64 = 8;

fn encode_record(buf: &mut BytesMut, time: i64, value: Option<f64>) -> Result<()> {
    let time = u32::try_from(time)
        .map_err(|_| Error::Validation(format!("time {} out of range", time)))?;
    buf.put_u32_le(time);
    buf.put_f32_le(value.map_or(f32::NAN, |v| v as f32));
    Ok(())
}

fn decode_records(mut bytes: &[u8]) -> Vec<Point> {
    let mut out = Vec::with_capacity(bytes.len() / RECORD_BYTES as usize);
    while bytes.remaining() >= RECORD_BYTES as usize {
        let time = i64::from(bytes.get_u32_le());
        let value = bytes.get_f32_le();
        out.push(Point::new(time, (!value.is_nan()).then_some(f64::from(value))));
    }
    out
}

pub struct VariableIntervalEngine {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl VariableIntervalEngine {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn data_path(&self, feed: FeedId) -> PathBuf {
        self.dir.join(format!("{}.dat", feed))
    }

    fn missing(feed: FeedId) -> Error {
        Error::NotFound(format!("No variable-interval data for feed {}", feed))
    }

    async fn read_all(&self, feed: FeedId) -> Result<Vec<u8>> {
        match fs::read(self.data_path(feed)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Self::missing(feed)),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, feed: FeedId) -> Result<Vec<Point>> {
        Ok(decode_records(&self.read_all(feed).await?))
    }

    async fn file_len(&self, feed: FeedId) -> Result<u64> {
        match fs::metadata(self.data_path(feed)).await {
            Ok(m) => Ok(m.len() - m.len() % RECORD_BYTES),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Self::missing(feed)),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_record_at(&self, feed: FeedId, offset: u64) -> Result<Option<Point>> {
        let mut file = fs::File::open(self.data_path(feed)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(RECORD_BYTES as usize);
        file.take(RECORD_BYTES).read_to_end(&mut buf).await?;
        Ok(decode_records(&buf).into_iter().next())
    }

    async fn write_at(&self, feed: FeedId, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new().write(true).open(self.data_path(feed)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    /// Replaces the data file so concurrent readers see the old or the new
    /// contents, never a partial rewrite.
    async fn rewrite(&self, feed: FeedId, records: &BTreeMap<i64, Option<f64>>) -> Result<()> {
        let mut buf = BytesMut::with_capacity(records.len() * RECORD_BYTES as usize);
        for (time, value) in records {
            encode_record(&mut buf, *time, *value)?;
        }
        let path = self.data_path(feed);
        let tmp = path.with_extension("dat.tmp");
        fs::write(&tmp, &buf).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Inserts or replaces samples. Caller holds the write lock.
    async fn merge(&self, feed: FeedId, points: Vec<(i64, Option<f64>)>) -> Result<()> {
        let mut records: BTreeMap<i64, Option<f64>> =
            self.load(feed).await?.into_iter().map(|p| (p.time, p.value)).collect();
        records.extend(points);
        self.rewrite(feed, &records).await
    }

    async fn post_locked(&self, feed: FeedId, time: i64, value: f64) -> Result<f64> {
        let len = self.file_len(feed).await?;
        let last = if len >= RECORD_BYTES {
            self.read_record_at(feed, len - RECORD_BYTES).await?
        } else {
            None
        };
        let mut record = BytesMut::with_capacity(RECORD_BYTES as usize);
        encode_record(&mut record, time, Some(value))?;
        match last {
            None => self.write_at(feed, len, &record).await?,
            Some(last) if time > last.time => self.write_at(feed, len, &record).await?,
            Some(last) if time == last.time => self.write_at(feed, len - RECORD_BYTES, &record).await?,
            Some(_) => self.merge(feed, vec![(time, Some(value))]).await?,
        }
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
impl FeedEngine for VariableIntervalEngine {
    fn name(&self) -> &'static str {
        "variable_interval"
    }

    async fn create(&self, feed: FeedId, _options: &EngineOptions) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if fs::try_exists(self.data_path(feed)).await? {
            return Err(Error::Validation(format!(
                "Variable-interval data for feed {} already exists",
                feed
            )));
        }
        fs::write(self.data_path(feed), b"").await?;
        Ok(())
    }

    async fn delete(&self, feed: FeedId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        remove_if_exists(&self.data_path(feed)).await
    }

    async fn trim(&self, feed: FeedId, start: i64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let records: BTreeMap<i64, Option<f64>> = self
            .load(feed)
            .await?
            .into_iter()
            .filter(|p| p.time >= start)
            .map(|p| (p.time, p.value))
            .collect();
        self.rewrite(feed, &records).await
    }

    async fn clear(&self, feed: FeedId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.file_len(feed).await?;
        fs::write(self.data_path(feed), b"").await?;
        Ok(())
    }

    async fn post(&self, feed: FeedId, time: i64, value: f64, _padding: Option<PaddingMode>) -> Result<f64> {
        let _guard = self.write_lock.lock().await;
        self.post_locked(feed, time, value).await
    }

    async fn post_multiple(&self, feed: FeedId, points: &[(i64, f64)], _padding: Option<PaddingMode>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.merge(feed, points.iter().map(|(t, v)| (*t, Some(*v))).collect()).await
    }

    async fn get_value(&self, feed: FeedId, time: i64) -> Result<Option<f64>> {
        let records = self.load(feed).await?;
        Ok(sampling::value_at_or_before(&records, time))
    }

    async fn get_data_combined(&self, feed: FeedId, query: &EngineQuery) -> Result<Vec<Point>> {
        let records = self.load(feed).await?;
        let (lo, hi) = sampling::window(query)?;
        let first = records.partition_point(|p| p.time < lo);
        let last = records.partition_point(|p| p.time < hi);
        sampling::sample_points(&records[first..last], query)
    }

    async fn get_meta(&self, feed: FeedId) -> Result<EngineMeta> {
        let records = self.load(feed).await?;
        Ok(EngineMeta {
            start_time: records.first().map(|p| p.time),
            end_time: records.last().map(|p| p.time),
            interval: None,
            npoints: Some(records.len() as u64),
        })
    }

    async fn get_feed_size(&self, feed: FeedId) -> Result<u64> {
        self.file_len(feed).await
    }

    async fn lastvalue(&self, feed: FeedId) -> Result<Option<LastValue>> {
        let len = self.file_len(feed).await?;
        if len < RECORD_BYTES {
            return Ok(None);
        }
        let last = self.read_record_at(feed, len - RECORD_BYTES).await?;
        Ok(last.map(|p| LastValue::new(p.time, p.value)))
    }

    async fn export(&self, feed: FeedId, start: i64) -> Result<Vec<Point>> {
        let records = self.load(feed).await?;
        let first = records.partition_point(|p| p.time < start);
        Ok(records[first..].to_vec())
    }

    async fn upload_variable_interval(&self, feed: FeedId, points: &[(i64, f64)]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.merge(feed, points.iter().map(|(t, v)| (*t, Some(*v))).collect()).await
    }

    async fn get_sha256sum(&self, feed: FeedId, npoints: u64) -> Result<String> {
        let bytes = self.read_all(feed).await?;
        let len = (npoints * RECORD_BYTES).min(bytes.len() as u64 - bytes.len() as u64 % RECORD_BYTES);
        Ok(hex::encode(Sha256::digest(&bytes[..len as usize])))
    }

    async fn sync(&self, feed: FeedId, payload: &[u8]) -> Result<()> {
        if payload.len() as u64 % RECORD_BYTES != 0 {
            return Err(Error::Integrity("Invalid frame length".to_string()));
        }
        let points: Vec<(i64, Option<f64>)> =
            decode_records(payload).into_iter().map(|p| (p.time, p.value)).collect();
        let _guard = self.write_lock.lock().await;
        self.merge(feed, points).await
    }
}
