//! Core data model shared by engines, metadata and the query pipeline.
//!
//! Leaf types only: feed records and their mutable fields, backend kinds,
//! time/value points and the naming rules feeds are validated against.

pub mod feed;
pub mod point;

pub use feed::*;
pub use point::*;
