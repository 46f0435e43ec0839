//! The feed facade.
//!
//! [`Feeds`] owns the metadata store, the optional metadata cache and the
//! engine registry, and keeps the two metadata representations coherent:
//!
//! - reads prefer the cache and populate it from the store on a miss,
//!   deriving a missing last value from the owning engine
//! - writes go to the store first, then to the cache
//! - cache failures are logged and treated as misses
//! - ownership and visibility checks always go to the store
//!
//! The query pipeline (`crate::query`) and the ingestion path
//! (`crate::ingest`) extend this type with their own `impl` blocks.

mod fields;
mod listing;

pub use fields::{FieldUpdate, ProcessListValidator};
pub use listing::FeedSummary;

use crate::config::ServiceConfig;
use crate::engine::{CsvSettings, Engine, EngineMeta, EngineOptions, EngineRegistry};
use crate::error::{Error, Result};
use crate::export;
use crate::metadata::{AccessControl, MemoryCache, MetadataCache, MetadataStore};
use crate::models::{
    is_valid_name, sanitize_ascii_name, validate_unit, EngineKind, FeedField, FeedId, FeedRecord, LastValue,
    NewFeed, Point, UserId,
};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Runtime settings of the facade, derived from [`ServiceConfig`].
#[derive(Debug, Clone, Default)]
pub struct FeedSettings {
    /// Route posts through the write buffer and merge it into reads
    pub buffer_enabled: bool,
    /// Request datapoint cap; `None` disables it
    pub max_datapoints: Option<u64>,
    pub csv: CsvSettings,
}

/// Logs a failed cache call and turns it into a miss.
pub(crate) fn cache_result<T>(result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to update cache: {}", e);
            None
        }
    }
}

fn keep_first(slot: &mut Option<Error>, step: &str, result: Result<()>) {
    if let Err(e) = result {
        error!("{} failed: {}", step, e);
        slot.get_or_insert(e);
    }
}

/// Options meaningful to a kind; everything else is dropped.
fn filter_options(kind: EngineKind, options: &EngineOptions) -> EngineOptions {
    match kind {
        EngineKind::FixedInterval => EngineOptions {
            interval: options.interval,
            ..EngineOptions::default()
        },
        kind if kind.is_relational() => EngineOptions {
            empty: options.empty,
            ..EngineOptions::default()
        },
        _ => EngineOptions::default(),
    }
}

pub struct Feeds {
    store: MetadataStore,
    cache: Option<Arc<dyn MetadataCache>>,
    registry: Arc<EngineRegistry>,
    access: Arc<dyn AccessControl>,
    settings: FeedSettings,
}

impl Feeds {
    pub fn new(
        store: MetadataStore,
        cache: Option<Arc<dyn MetadataCache>>,
        registry: Arc<EngineRegistry>,
        settings: FeedSettings,
    ) -> Self {
        let access: Arc<dyn AccessControl> = Arc::new(store.clone());
        Self {
            store,
            cache,
            registry,
            access,
            settings,
        }
    }

    /// Builds the store, the cache (when enabled) and the registry from
    /// configuration.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let store = MetadataStore::new(&config.metadata.connection)?;
        let cache: Option<Arc<dyn MetadataCache>> = if config.cache.enabled {
            Some(Arc::new(MemoryCache::new()))
        } else {
            None
        };
        let registry = Arc::new(EngineRegistry::new(config.engine_settings()));
        Ok(Self::new(store, cache, registry, config.feed_settings()))
    }

    /// Replaces the store-backed ownership checks.
    pub fn with_access_control(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub(crate) fn cache(&self) -> Option<&Arc<dyn MetadataCache>> {
        self.cache.as_ref()
    }

    pub(crate) fn engine_for(&self, record: &FeedRecord) -> Arc<Engine> {
        self.registry.get_by_id(record.engine)
    }

    /// The write buffer, when enabled.
    pub(crate) fn buffer(&self) -> Option<Arc<Engine>> {
        if self.settings.buffer_enabled {
            Some(self.registry.get(EngineKind::WriteBuffer))
        } else {
            None
        }
    }

    /// Fills in a missing last value from the owning engine. Virtual feeds are
    /// left alone; their value is computed on demand.
    pub(super) async fn derive_lastvalue(&self, record: &mut FeedRecord) {
        if record.time.is_some() || record.kind() == Some(EngineKind::Virtual) {
            return;
        }
        match self.engine_for(record).backend().lastvalue(record.id).await {
            Ok(Some(last)) => {
                record.time = Some(last.time);
                record.value = last.value;
            }
            Ok(None) => {}
            Err(e) => warn!("Could not read last value of feed {}: {}", record.id, e),
        }
    }

    /// Puts a store record into the cache. The owner set is left alone: a
    /// set only exists once every feed of the owner has been loaded.
    pub(crate) async fn cache_record(&self, record: &FeedRecord) {
        if let Some(cache) = &self.cache {
            cache_result(cache.store(record).await);
        }
    }

    /// Adds a feed to its owner's set when that set is already populated.
    async fn cache_owner_entry(&self, record: &FeedRecord) {
        if let Some(cache) = &self.cache {
            if let Some(Some(_)) = cache_result(cache.user_feeds(record.userid).await) {
                cache_result(cache.add_user_feed(record.userid, record.id).await);
            }
        }
    }

    /// Read-through load of one record.
    pub(crate) async fn load_record(&self, id: FeedId) -> Result<Option<FeedRecord>> {
        if let Some(cache) = &self.cache {
            if let Some(Some(record)) = cache_result(cache.load(id).await) {
                return Ok(Some(record));
            }
        }
        let Some(mut record) = self.store.load(id).await? else {
            return Ok(None);
        };
        self.derive_lastvalue(&mut record).await;
        self.cache_record(&record).await;
        Ok(Some(record))
    }

    /// Writes fields to the store, then mirrors them into the cache.
    pub(crate) async fn write_fields(&self, id: FeedId, fields: &[FeedField]) -> Result<bool> {
        let updated = self.store.update_fields(id, fields).await?;
        if updated {
            if let Some(cache) = &self.cache {
                cache_result(cache.update(id, fields).await);
            }
        }
        Ok(updated)
    }

    pub async fn exist(&self, id: FeedId) -> Result<bool> {
        if let Some(cache) = &self.cache {
            if let Some(true) = cache_result(cache.contains(id).await) {
                return Ok(true);
            }
        }
        Ok(self.load_record(id).await?.is_some())
    }

    /// The full record. Virtual feeds carry their live last value.
    pub async fn get(&self, id: FeedId) -> Result<FeedRecord> {
        let mut record = self.load_record(id).await?.ok_or_else(Error::feed_not_found)?;
        if record.kind() == Some(EngineKind::Virtual) {
            match self.engine_for(&record).backend().lastvalue(id).await {
                Ok(Some(last)) => {
                    record.time = Some(last.time);
                    record.value = last.value;
                }
                Ok(None) => {}
                Err(e) => warn!("Could not compute virtual feed {}: {}", id, e),
            }
        }
        Ok(record)
    }

    /// One field of the record as JSON. `time` and `value` are resolved like
    /// [`Feeds::get_timevalue`].
    pub async fn get_field(&self, id: FeedId, field: &str) -> Result<serde_json::Value> {
        let field: String = field
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
            .collect();
        if field.is_empty() {
            return Err(Error::Validation("Missing field parameter".to_string()));
        }
        let record = self.get(id).await?;
        if field == "time" || field == "value" {
            let last = self.get_timevalue(id).await?;
            return Ok(match (field.as_str(), last) {
                ("time", Some(last)) => serde_json::json!(last.time),
                ("value", Some(last)) => serde_json::json!(last.value),
                _ => serde_json::Value::Null,
            });
        }
        let value = serde_json::to_value(&record)?;
        value
            .get(&field)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("Unknown feed field {}", field)))
    }

    pub async fn get_engine(&self, id: FeedId) -> Result<u32> {
        Ok(self.get(id).await?.engine)
    }

    pub async fn get_timevalue(&self, id: FeedId) -> Result<Option<LastValue>> {
        let record = self.load_record(id).await?.ok_or_else(Error::feed_not_found)?;
        if record.kind() == Some(EngineKind::Virtual) {
            return self.engine_for(&record).backend().lastvalue(id).await;
        }
        Ok(record.time.map(|time| LastValue::new(time, record.value)))
    }

    pub async fn set_timevalue(&self, id: FeedId, time: i64, value: Option<f64>) -> Result<()> {
        self.write_fields(id, &[FeedField::LastValue { time, value }]).await?;
        Ok(())
    }

    /// Last value, or the value at `time` for file-backed kinds.
    pub async fn get_value(&self, id: FeedId, time: Option<i64>) -> Result<Option<f64>> {
        match time {
            Some(time) => {
                let record = self.get(id).await?;
                match record.kind() {
                    Some(kind) if kind.is_file_backed() => {
                        self.engine_for(&record).backend().get_value(id, time).await
                    }
                    _ => Ok(self.get_timevalue(id).await?.and_then(|last| last.value)),
                }
            }
            None => Ok(self.get_timevalue(id).await?.and_then(|last| last.value)),
        }
    }

    /// Creates a feed and provisions its engine storage.
    pub async fn create(
        &self,
        userid: UserId,
        tag: &str,
        name: &str,
        engine: u32,
        options: &EngineOptions,
        unit: &str,
    ) -> Result<FeedId> {
        if !is_valid_name(name) {
            return Err(Error::Validation("invalid characters in feed name".to_string()));
        }
        if !is_valid_name(tag) {
            return Err(Error::Validation("invalid characters in feed tag".to_string()));
        }
        validate_unit(unit).map_err(|msg| Error::Validation(msg.to_string()))?;

        let kind = match EngineKind::from_id(engine) {
            Some(kind) if kind.is_production() => kind,
            _ => {
                error!("Engine id {} is not supported", engine);
                return Err(Error::Validation(format!("ABORTED: Engine id {} is not supported.", engine)));
            }
        };
        if self.exists_tag_name(userid, tag, name).await?.is_some() {
            return Err(Error::Validation("feed already exists".to_string()));
        }

        let new_feed = NewFeed {
            userid,
            tag: tag.to_string(),
            name: name.to_string(),
            engine: kind,
            unit: unit.to_string(),
        };
        let id = self.store.insert(&new_feed).await?;
        if let Some(record) = self.store.load(id).await? {
            self.cache_record(&record).await;
            self.cache_owner_entry(&record).await;
        }

        let options = filter_options(kind, options);
        if let Err(e) = self.registry.get(kind).backend().create(id, &options).await {
            warn!("Engine {} could not create feed {}: {}", kind, id, e);
            self.store.delete(id).await?;
            if let Some(cache) = &self.cache {
                cache_result(cache.remove(id).await);
                cache_result(cache.remove_user_feed(userid, id).await);
            }
            return Err(e);
        }

        info!(feed = id, userid, engine = %kind, "Created feed");
        Ok(id)
    }

    /// Removes engine storage, buffered points and both metadata
    /// representations. Every step runs; the first failure is returned.
    pub async fn delete(&self, id: FeedId) -> Result<()> {
        let record = self.get(id).await?;
        let mut failure = None;

        if let Some(buffer) = self.buffer() {
            keep_first(&mut failure, "buffer delete", buffer.backend().delete(id).await);
        }
        keep_first(&mut failure, "engine delete", self.engine_for(&record).backend().delete(id).await);
        keep_first(&mut failure, "metadata delete", self.store.delete(id).await);
        if let Some(cache) = &self.cache {
            keep_first(&mut failure, "cache delete", cache.remove(id).await);
            keep_first(&mut failure, "cache set delete", cache.remove_user_feed(record.userid, id).await);
        }

        match failure {
            Some(e) => Err(e),
            None => {
                info!(feed = id, "Deleted feed");
                Ok(())
            }
        }
    }

    /// Drops samples before `start`.
    pub async fn trim(&self, id: FeedId, start: i64) -> Result<()> {
        let record = self.get(id).await?;
        if let Some(buffer) = self.buffer() {
            buffer.backend().delete(id).await?;
        }
        self.engine_for(&record).backend().trim(id, start).await?;
        self.update_feed_size(id).await?;
        info!(feed = id, start, "Trimmed feed");
        Ok(())
    }

    /// Drops every sample; the last value becomes 0 at its previous time.
    pub async fn clear(&self, id: FeedId) -> Result<()> {
        let record = self.get(id).await?;
        if let Some(buffer) = self.buffer() {
            buffer.backend().delete(id).await?;
        }
        self.engine_for(&record).backend().clear(id).await?;
        self.update_feed_size(id).await?;
        if let Some(time) = record.time {
            self.set_timevalue(id, time, Some(0.0)).await?;
        }
        info!(feed = id, "Cleared feed");
        Ok(())
    }

    pub async fn access(&self, userid: UserId, id: FeedId) -> Result<bool> {
        self.access.owns(userid, id).await
    }

    pub async fn read_access(&self, userid: Option<UserId>, id: FeedId) -> Result<bool> {
        self.access.may_read(userid, id).await
    }

    /// Looks a feed up by name, ignoring characters names may not contain.
    pub async fn get_id(&self, userid: UserId, name: &str) -> Result<Option<FeedId>> {
        self.store.find_by_name(userid, &sanitize_ascii_name(name)).await
    }

    pub async fn exists_tag_name(&self, userid: UserId, tag: &str, name: &str) -> Result<Option<FeedId>> {
        self.store.find_by_tag_name(userid, tag, name).await
    }

    /// Recomputes and stores the feed's size in bytes.
    pub async fn update_feed_size(&self, id: FeedId) -> Result<u64> {
        let record = self.get(id).await?;
        let size = self.engine_for(&record).backend().get_feed_size(id).await?;
        self.write_fields(id, &[FeedField::Size(size)]).await?;
        Ok(size)
    }

    /// Recomputes every feed of an owner; returns the total size.
    pub async fn update_user_feeds_size(&self, userid: UserId) -> Result<u64> {
        let mut total = 0;
        for id in self.store.user_feed_ids(userid).await? {
            match self.update_feed_size(id).await {
                Ok(size) => total += size,
                Err(e) => warn!("Could not size feed {}: {}", id, e),
            }
        }
        Ok(total)
    }

    /// Points waiting in the write buffer.
    pub fn get_buffer_size(&self) -> usize {
        self.buffer()
            .and_then(|engine| engine.as_buffer().map(|buffer| buffer.buffer_size()))
            .unwrap_or(0)
    }

    pub async fn get_meta(&self, id: FeedId) -> Result<EngineMeta> {
        let record = self.get(id).await?;
        self.engine_for(&record).backend().get_meta(id).await
    }

    pub async fn get_sha256sum(&self, id: FeedId, npoints: u64) -> Result<String> {
        let record = self.get(id).await?;
        match record.kind() {
            Some(kind) if kind.is_file_backed() => self.engine_for(&record).backend().get_sha256sum(id, npoints).await,
            _ => Err(Error::Unsupported(
                "SHA256SUM is only supported by fixed_interval and variable_interval engines".to_string(),
            )),
        }
    }

    /// Every stored sample at or after `start`.
    pub async fn export(&self, id: FeedId, start: i64) -> Result<Vec<Point>> {
        let record = self.get(id).await?;
        self.engine_for(&record).backend().export(id, start).await
    }

    /// [`Feeds::export`] as an Arrow record batch.
    pub async fn export_arrow(&self, id: FeedId, start: i64) -> Result<RecordBatch> {
        let points = self.export(id, start).await?;
        export::points_to_record_batch(&points)
    }

    pub async fn delete_data_point(&self, id: FeedId, time: i64) -> Result<()> {
        let record = self.get(id).await?;
        self.engine_for(&record).backend().delete_data_point(id, time).await?;
        self.update_feed_size(id).await?;
        Ok(())
    }

    pub async fn delete_data_range(&self, id: FeedId, start: i64, end: i64) -> Result<()> {
        let record = self.get(id).await?;
        self.engine_for(&record).backend().delete_data_range(id, start, end).await?;
        self.update_feed_size(id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_are_filtered_per_kind() {
        let options = EngineOptions {
            interval: Some(10),
            empty: true,
        };
        assert_eq!(
            filter_options(EngineKind::FixedInterval, &options),
            EngineOptions {
                interval: Some(10),
                empty: false
            }
        );
        assert_eq!(
            filter_options(EngineKind::MemoryTable, &options),
            EngineOptions {
                interval: None,
                empty: true
            }
        );
        assert_eq!(filter_options(EngineKind::VariableInterval, &options), EngineOptions::default());
    }
}
