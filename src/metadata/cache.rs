//! Key/value mirror of feed records.
//!
//! The cache holds one record per feed id and one id set per owner. It is
//! optional: the facade treats every cache failure as a miss.

use crate::error::Result;
use crate::models::{FeedField, FeedId, FeedRecord, UserId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

/// Operations a metadata cache must provide. Field updates and set
/// membership changes are atomic per call.
#[async_trait]
pub trait MetadataCache: Send + Sync + 'static {
    async fn load(&self, id: FeedId) -> Result<Option<FeedRecord>>;

    /// Loads many records in one round-trip. The result is aligned with `ids`.
    async fn load_many(&self, ids: &[FeedId]) -> Result<Vec<Option<FeedRecord>>>;

    async fn store(&self, record: &FeedRecord) -> Result<()>;

    /// Applies fields to a cached record. Returns false (and changes nothing)
    /// when the record is not cached.
    async fn update(&self, id: FeedId, fields: &[FeedField]) -> Result<bool>;

    async fn contains(&self, id: FeedId) -> Result<bool>;

    async fn remove(&self, id: FeedId) -> Result<()>;

    async fn add_user_feed(&self, userid: UserId, id: FeedId) -> Result<()>;

    async fn remove_user_feed(&self, userid: UserId, id: FeedId) -> Result<()>;

    /// The owner's feed ids, or `None` when the set was never populated.
    async fn user_feeds(&self, userid: UserId) -> Result<Option<Vec<FeedId>>>;
}

#[derive(Default)]
struct CacheState {
    records: HashMap<FeedId, FeedRecord>,
    user_feeds: HashMap<UserId, BTreeSet<FeedId>>,
}

/// In-process cache.
#[derive(Default)]
pub struct MemoryCache {
    state: RwLock<CacheState>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MetadataCache for MemoryCache {
    async fn load(&self, id: FeedId) -> Result<Option<FeedRecord>> {
        Ok(self.state.read().records.get(&id).cloned())
    }

    async fn load_many(&self, ids: &[FeedId]) -> Result<Vec<Option<FeedRecord>>> {
        let state = self.state.read();
        Ok(ids.iter().map(|id| state.records.get(id).cloned()).collect())
    }

    async fn store(&self, record: &FeedRecord) -> Result<()> {
        self.state.write().records.insert(record.id, record.clone());
        Ok(())
    }

    async fn update(&self, id: FeedId, fields: &[FeedField]) -> Result<bool> {
        let mut state = self.state.write();
        match state.records.get_mut(&id) {
            Some(record) => {
                for field in fields {
                    record.apply(field);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn contains(&self, id: FeedId) -> Result<bool> {
        Ok(self.state.read().records.contains_key(&id))
    }

    async fn remove(&self, id: FeedId) -> Result<()> {
        self.state.write().records.remove(&id);
        Ok(())
    }

    async fn add_user_feed(&self, userid: UserId, id: FeedId) -> Result<()> {
        self.state.write().user_feeds.entry(userid).or_default().insert(id);
        Ok(())
    }

    async fn remove_user_feed(&self, userid: UserId, id: FeedId) -> Result<()> {
        if let Some(ids) = self.state.write().user_feeds.get_mut(&userid) {
            ids.remove(&id);
        }
        Ok(())
    }

    async fn user_feeds(&self, userid: UserId) -> Result<Option<Vec<FeedId>>> {
        Ok(self
            .state
            .read()
            .user_feeds
            .get(&userid)
            .map(|ids| ids.iter().copied().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: FeedId) -> FeedRecord {
        FeedRecord {
            id,
            userid: 1,
            name: format!("feed{}", id),
            tag: "t".into(),
            public: false,
            size: 0,
            engine: 5,
            unit: String::new(),
            process_list: String::new(),
            time: None,
            value: None,
        }
    }

    #[tokio::test]
    async fn test_update_only_touches_cached_records() {
        let cache = MemoryCache::new();
        assert!(!cache.update(1, &[FeedField::Size(10)]).await.unwrap());
        assert!(!cache.contains(1).await.unwrap());

        cache.store(&record(1)).await.unwrap();
        assert!(cache
            .update(1, &[FeedField::Unit("kWh".into()), FeedField::Size(10)])
            .await
            .unwrap());
        let cached = cache.load(1).await.unwrap().unwrap();
        assert_eq!(cached.unit, "kWh");
        assert_eq!(cached.size, 10);
    }

    #[tokio::test]
    async fn test_user_sets_and_batched_loads() {
        let cache = MemoryCache::new();
        assert_eq!(cache.user_feeds(1).await.unwrap(), None);

        cache.store(&record(2)).await.unwrap();
        cache.add_user_feed(1, 2).await.unwrap();
        cache.add_user_feed(1, 7).await.unwrap();
        assert_eq!(cache.user_feeds(1).await.unwrap(), Some(vec![2, 7]));

        let loaded = cache.load_many(&[2, 7]).await.unwrap();
        assert!(loaded[0].is_some());
        assert!(loaded[1].is_none());

        cache.remove_user_feed(1, 7).await.unwrap();
        cache.remove(2).await.unwrap();
        assert_eq!(cache.user_feeds(1).await.unwrap(), Some(vec![2]));
        assert!(cache.is_empty());
    }
}
