//! Core types for the chronolog event aggregation engine.
//!
//! This crate provides:
//! - The [`Event`] data model, including one-level related-event clusters
//! - Feed metadata and persisted configuration ([`FeedInfo`], [`FeedConfig`])
//! - The [`Field`] dedup-key selector
//! - Opaque pagination types ([`Cursor`], [`Page`])
//! - Shared error types

mod error;
mod event;
mod feed;
mod page;

pub use error::{Error, Result};
pub use event::{Event, Field, Media, SearchDoc, DATEFMT};
pub use feed::{FeedConfig, FeedFlags, FeedInfo};
pub use page::{Cursor, Page};
