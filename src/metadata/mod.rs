//! Feed metadata: the authoritative store and its optional cache.

pub mod cache;
pub mod store;

pub use cache::{MemoryCache, MetadataCache};
pub use store::MetadataStore;

use crate::error::Result;
use crate::models::{FeedId, UserId};
use async_trait::async_trait;

/// Ownership and visibility checks. Implementations must answer from
/// authoritative data, never from a cache.
#[async_trait]
pub trait AccessControl: Send + Sync + 'static {
    async fn owns(&self, userid: UserId, feed: FeedId) -> Result<bool>;

    /// Owner or public feed. `None` is an anonymous reader.
    async fn may_read(&self, userid: Option<UserId>, feed: FeedId) -> Result<bool>;
}
