//! Feed data engine.
//!
//! Stores time-series feeds in one of several backend engines, keeps feed
//! metadata coherent between a DuckDB store and an in-process cache, buffers
//! low-latency writes, and serves range reads through a staged query
//! pipeline.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod feeds;
pub mod ingest;
pub mod logging;
pub mod metadata;
pub mod models;
pub mod query;
pub mod time;

// Re-export commonly used types
pub use error::{Error, Failure, Result};
pub use feeds::{FeedSettings, Feeds};
pub use query::{FeedData, QueryParams};
