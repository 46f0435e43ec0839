//! Read-only engine for virtual feeds.
//!
//! Values of a virtual feed are computed from other feeds by an external
//! evaluator, reached through [`VirtualSource`].

use super::{EngineOptions, EngineQuery, FeedEngine};
use crate::error::{Error, Result};
use crate::models::{FeedId, LastValue, Point};
use async_trait::async_trait;
use std::sync::Arc;

/// Evaluator of virtual feed values.
#[async_trait]
pub trait VirtualSource: Send + Sync + 'static {
    async fn get_data(&self, feed: FeedId, query: &EngineQuery) -> Result<Vec<Point>>;

    async fn lastvalue(&self, feed: FeedId) -> Result<Option<LastValue>>;
}

/// Source used when no evaluator is configured; every read fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredSource;

#[async_trait]
impl VirtualSource for UnconfiguredSource {
    async fn get_data(&self, feed: FeedId, _query: &EngineQuery) -> Result<Vec<Point>> {
        Err(Error::Backend(format!("No virtual feed source configured for feed {}", feed)))
    }

    async fn lastvalue(&self, feed: FeedId) -> Result<Option<LastValue>> {
        Err(Error::Backend(format!("No virtual feed source configured for feed {}", feed)))
    }
}

pub struct VirtualEngine {
    source: Arc<dyn VirtualSource>,
}

impl VirtualEngine {
    pub fn new(source: Arc<dyn VirtualSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl FeedEngine for VirtualEngine {
    fn name(&self) -> &'static str {
        "virtual"
    }

    /// Nothing is stored, so creation and deletion only succeed.
    async fn create(&self, _feed: FeedId, _options: &EngineOptions) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _feed: FeedId) -> Result<()> {
        Ok(())
    }

    async fn get_data_combined(&self, feed: FeedId, query: &EngineQuery) -> Result<Vec<Point>> {
        self.source.get_data(feed, query).await
    }

    async fn lastvalue(&self, feed: FeedId) -> Result<Option<LastValue>> {
        self.source.lastvalue(feed).await
    }

    async fn get_feed_size(&self, _feed: FeedId) -> Result<u64> {
        Ok(0)
    }
}
