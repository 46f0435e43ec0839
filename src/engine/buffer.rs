//! Low-latency write buffer.
//!
//! Holds recent samples per feed, together with the feed's backend kind,
//! padding mode and last update time, until a flush moves them into the
//! backend. Reads merge buffered samples into backend data.

use super::{sampling, EngineMeta, EngineQuery, FeedEngine};
use crate::error::Result;
use crate::models::{EngineKind, FeedId, LastValue, PaddingMode, Point};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Buffered state of one feed.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedFeed {
    pub backend: EngineKind,
    pub padding: Option<PaddingMode>,
    pub update_time: i64,
    pub points: BTreeMap<i64, f64>,
}

pub struct BufferEngine {
    feeds: RwLock<HashMap<FeedId, BufferedFeed>>,
    max_points: usize,
}

impl BufferEngine {
    pub fn new(max_points: usize) -> Self {
        Self {
            feeds: RwLock::new(HashMap::new()),
            max_points: max_points.max(1),
        }
    }

    /// Buffers one sample for a feed stored by `backend`. When the feed holds
    /// more than the configured bound the oldest samples are dropped.
    pub fn post_buffered(
        &self,
        feed: FeedId,
        backend: EngineKind,
        update_time: i64,
        time: i64,
        value: f64,
        padding: Option<PaddingMode>,
    ) -> f64 {
        let mut feeds = self.feeds.write();
        let entry = feeds.entry(feed).or_insert_with(|| BufferedFeed {
            backend,
            padding,
            update_time,
            points: BTreeMap::new(),
        });
        entry.backend = backend;
        entry.padding = padding;
        entry.update_time = update_time;
        entry.points.insert(time, value);

        let mut dropped = 0;
        while entry.points.len() > self.max_points {
            entry.points.pop_first();
            dropped += 1;
        }
        if dropped > 0 {
            warn!(feed, dropped, max = self.max_points, "write buffer full, dropped oldest points");
        }
        value
    }

    /// Feeds with pending samples, in ascending id order.
    pub fn active_feeds(&self) -> Vec<FeedId> {
        let feeds = self.feeds.read();
        let mut ids: Vec<FeedId> = feeds
            .iter()
            .filter(|(_, buffered)| !buffered.points.is_empty())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Pending samples across all feeds.
    pub fn buffer_size(&self) -> usize {
        self.feeds.read().values().map(|buffered| buffered.points.len()).sum()
    }

    pub fn pending(&self, feed: FeedId) -> usize {
        self.feeds.read().get(&feed).map_or(0, |buffered| buffered.points.len())
    }

    /// Removes and returns everything buffered for a feed.
    pub fn drain(&self, feed: FeedId) -> Option<BufferedFeed> {
        self.feeds.write().remove(&feed)
    }

    fn points_in(&self, feed: FeedId, lo: i64, hi: i64) -> Vec<Point> {
        let feeds = self.feeds.read();
        match feeds.get(&feed) {
            Some(buffered) if lo < hi => buffered
                .points
                .range(lo..hi)
                .map(|(time, value)| Point::sample(*time, *value))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl FeedEngine for BufferEngine {
    fn name(&self) -> &'static str {
        "write_buffer"
    }

    async fn delete(&self, feed: FeedId) -> Result<()> {
        self.feeds.write().remove(&feed);
        Ok(())
    }

    async fn trim(&self, feed: FeedId, start: i64) -> Result<()> {
        if let Some(buffered) = self.feeds.write().get_mut(&feed) {
            buffered.points.retain(|time, _| *time >= start);
        }
        Ok(())
    }

    async fn clear(&self, feed: FeedId) -> Result<()> {
        if let Some(buffered) = self.feeds.write().get_mut(&feed) {
            buffered.points.clear();
        }
        Ok(())
    }

    /// Buffered samples only; empty buckets are never reported as gaps.
    async fn get_data_combined(&self, feed: FeedId, query: &EngineQuery) -> Result<Vec<Point>> {
        let (lo, hi) = sampling::window(query)?;
        let points = self.points_in(feed, lo, hi);
        let mut query = query.clone();
        query.skip_missing = true;
        sampling::sample_points(&points, &query)
    }

    async fn get_meta(&self, feed: FeedId) -> Result<EngineMeta> {
        let feeds = self.feeds.read();
        let points = feeds.get(&feed).map(|buffered| &buffered.points);
        Ok(EngineMeta {
            start_time: points.and_then(|p| p.keys().next().copied()),
            end_time: points.and_then(|p| p.keys().next_back().copied()),
            interval: None,
            npoints: Some(points.map_or(0, |p| p.len() as u64)),
        })
    }

    async fn lastvalue(&self, feed: FeedId) -> Result<Option<LastValue>> {
        let feeds = self.feeds.read();
        Ok(feeds
            .get(&feed)
            .and_then(|buffered| buffered.points.iter().next_back())
            .map(|(time, value)| LastValue::new(*time, Some(*value))))
    }
}
