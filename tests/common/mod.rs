//! Shared fixtures: a facade over an in-memory metadata store and a
//! temporary data directory.
#![allow(dead_code)]

use feedstream_core::engine::{EngineOptions, EngineRegistry, EngineSettings};
use feedstream_core::metadata::{MemoryCache, MetadataCache, MetadataStore};
use feedstream_core::models::{EngineKind, FeedId, UserId};
use feedstream_core::{FeedSettings, Feeds};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestFeeds {
    pub feeds: Feeds,
    pub cache: Arc<MemoryCache>,
    // removed on drop
    pub dir: TempDir,
}

pub fn settings(buffer_enabled: bool) -> FeedSettings {
    FeedSettings {
        buffer_enabled,
        max_datapoints: Some(8928),
        ..FeedSettings::default()
    }
}

pub fn test_feeds(settings: FeedSettings) -> TestFeeds {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = Arc::new(EngineRegistry::new(EngineSettings {
        datadir: dir.path().to_path_buf(),
        relational_connection: ":memory:".to_string(),
        buffer_max_points: 1000,
    }));
    let store = MetadataStore::new_in_memory().expect("metadata store");
    let cache = Arc::new(MemoryCache::new());
    let shared: Arc<dyn MetadataCache> = cache.clone();
    TestFeeds {
        feeds: Feeds::new(store, Some(shared), registry, settings),
        cache,
        dir,
    }
}

pub async fn fixed_feed(feeds: &Feeds, userid: UserId, name: &str, interval: i64) -> FeedId {
    let options = EngineOptions {
        interval: Some(interval),
        ..EngineOptions::default()
    };
    feeds
        .create(userid, "test", name, EngineKind::FixedInterval.id(), &options, "W")
        .await
        .expect("create fixed feed")
}

pub async fn variable_feed(feeds: &Feeds, userid: UserId, name: &str) -> FeedId {
    feeds
        .create(userid, "test", name, EngineKind::VariableInterval.id(), &EngineOptions::default(), "")
        .await
        .expect("create variable feed")
}
