//! Inert engine handed out for invalid or unconstructible kinds.
//!
//! Every capability falls through to the trait defaults and reports
//! [`Error::Unsupported`](crate::error::Error::Unsupported), so callers never
//! branch on a missing engine.

use super::FeedEngine;
use async_trait::async_trait;

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledEngine;

#[async_trait]
impl FeedEngine for DisabledEngine {
    fn name(&self) -> &'static str {
        "disabled"
    }
}
