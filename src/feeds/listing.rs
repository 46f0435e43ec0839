//! Per-owner feed listings.

use super::{cache_result, Feeds};
use crate::engine::EngineMeta;
use crate::error::Result;
use crate::models::{EngineKind, FeedField, FeedId, FeedRecord, UserId};
use serde::Serialize;
use tracing::warn;

/// A feed record, optionally with its engine's storage statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedSummary {
    #[serde(flatten)]
    pub record: FeedRecord,
    #[serde(flatten)]
    pub meta: Option<EngineMeta>,
}

impl Feeds {
    /// The owner's records through the cache: populates the owner set from the
    /// store when it was never loaded, then reads every record in one batch.
    async fn cached_user_records(&self, userid: UserId) -> Result<Option<Vec<FeedRecord>>> {
        let Some(cache) = self.cache() else {
            return Ok(None);
        };
        let ids = match cache_result(cache.user_feeds(userid).await) {
            Some(Some(ids)) => ids,
            Some(None) => {
                let mut ids = Vec::new();
                for mut record in self.store().load_user(userid).await? {
                    self.derive_lastvalue(&mut record).await;
                    self.cache_record(&record).await;
                    cache_result(cache.add_user_feed(userid, record.id).await);
                    ids.push(record.id);
                }
                ids
            }
            None => return Ok(None),
        };

        let Some(cached) = cache_result(cache.load_many(&ids).await) else {
            return Ok(None);
        };
        let mut records = Vec::with_capacity(ids.len());
        for (id, record) in ids.iter().zip(cached) {
            match record {
                Some(record) => records.push(record),
                None => {
                    if let Some(record) = self.load_record(*id).await? {
                        records.push(record);
                    }
                }
            }
        }
        Ok(Some(records))
    }

    /// Every feed of an owner, ascending by id. Virtual feeds carry a live
    /// last value; missing last values are read from the engine and stored.
    pub async fn get_user_feeds(&self, userid: UserId, with_meta: bool) -> Result<Vec<FeedSummary>> {
        let mut records = match self.cached_user_records(userid).await? {
            Some(records) => records,
            None => self.store().load_user(userid).await?,
        };
        records.sort_by_key(|record| record.id);

        let mut feeds = Vec::with_capacity(records.len());
        for mut record in records {
            let engine = self.engine_for(&record);
            if record.kind() == Some(EngineKind::Virtual) {
                match engine.backend().lastvalue(record.id).await {
                    Ok(last) => {
                        record.time = last.map(|last| last.time);
                        record.value = last.and_then(|last| last.value);
                    }
                    Err(e) => warn!("Could not compute virtual feed {}: {}", record.id, e),
                }
            } else if record.time.is_none() {
                self.derive_lastvalue(&mut record).await;
                if let Some(time) = record.time {
                    self.write_fields(record.id, &[FeedField::LastValue { time, value: record.value }])
                        .await?;
                }
            }

            let meta = if with_meta {
                match engine.backend().get_meta(record.id).await {
                    Ok(meta) => Some(meta),
                    Err(e) => {
                        warn!("Could not read meta of feed {}: {}", record.id, e);
                        None
                    }
                }
            } else {
                None
            };
            feeds.push(FeedSummary { record, meta });
        }
        Ok(feeds)
    }

    pub async fn get_user_public_feeds(&self, userid: UserId, with_meta: bool) -> Result<Vec<FeedSummary>> {
        let feeds = self.get_user_feeds(userid, with_meta).await?;
        Ok(feeds.into_iter().filter(|feed| feed.record.public).collect())
    }

    pub async fn get_user_feeds_with_meta(&self, userid: UserId) -> Result<Vec<FeedSummary>> {
        self.get_user_feeds(userid, true).await
    }

    pub async fn get_user_feed_ids(&self, userid: UserId) -> Result<Vec<FeedId>> {
        if let Some(records) = self.cached_user_records(userid).await? {
            let mut ids: Vec<FeedId> = records.iter().map(|record| record.id).collect();
            ids.sort_unstable();
            return Ok(ids);
        }
        self.store().user_feed_ids(userid).await
    }
}
