//! Feed ingestion engine for chronolog.
//!
//! This crate turns a paginated upstream API into a deduplicated, grouped
//! stream of events persisted through the store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   FeedSource    │  one per upstream service (capability trait)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Paginator    │  one request at a time, retry protocol, pacing
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ fetch / group   │  key-field dedup, time-window clustering
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │      Store      │  idempotent persistence + search indexing
//! └─────────────────┘
//! ```
//!
//! Each feed's `update` runs as its own task; a failing feed is logged and
//! reported as zero events added, never halting the rest.

pub mod engine;
pub mod enrich;
pub mod error;
pub mod replay;
pub mod source;

pub use engine::{group, IngestionEngine, Paginator};
pub use enrich::Enricher;
pub use error::{Error, Result};
pub use replay::replay;
pub use source::{
    Capability, FeedSource, FetchContext, FetchRequest, ParseOutcome, StatusAction,
};
