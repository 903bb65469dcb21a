//! Persistence and retrieval for the chronolog aggregation engine.
//!
//! This crate provides:
//! - [`ConnectionPool`] - bounded relational pool with reconnect-on-failure
//!   and scoped transactional access
//! - [`QueryBuilder`] / [`EventQuery`] - composable query fragments and the
//!   single-round-trip parent-with-children projection
//! - [`SearchIndex`] - tantivy full-text index kept in lockstep with the
//!   relational store
//! - [`ResultSet`] - one pagination contract over two backing engines
//! - [`Store`] - the facade composing all of the above
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────────┐
//! │  Store API   │────▶│  ConnectionPool │  rusqlite, one txn per batch
//! │              │     └─────────────────┘
//! │ add/update/  │     ┌─────────────────┐
//! │ remove/get   │────▶│   SearchIndex   │  tantivy, serialized writer
//! └──────┬───────┘     └─────────────────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │  ResultSet   │  keyset cursor (query) / page number (search)
//! └──────────────┘
//! ```
//!
//! Store and index are updated in lockstep but not atomically together; a
//! crash between a store commit and its paired index commit is the only
//! window where they diverge, which is an accepted limitation.

mod error;
mod eventquery;
mod pool;
mod query;
mod resultset;
mod schema;
mod search;
mod store;

pub use error::{Error, Result};
pub use eventquery::EventQuery;
pub use pool::{ConnectionPool, PoolConfig};
pub use query::QueryBuilder;
pub use resultset::{Pages, QueryResultSet, ResultSet, SearchResultSet};
pub use search::{SearchConstraints, SearchHits, SearchIndex};
pub use store::{FeedFilter, SearchQuery, Store, StoreConfig, TimeRangeQuery};
