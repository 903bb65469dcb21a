//! Error types for the store.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the persistence and retrieval layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Database error.
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Search index error.
    #[error("search index error: {0}")]
    Search(#[from] tantivy::TantivyError),

    /// Search query parse error.
    #[error("search query error: {0}")]
    SearchQuery(#[from] tantivy::query::QueryParserError),

    /// Failure opening the search index directory.
    #[error("search index error: {0}")]
    OpenDirectory(#[from] tantivy::directory::error::OpenDirectoryError),

    /// The pool failed to re-establish connectivity within its retry budget.
    #[error("unable to connect to database after {attempts} attempts")]
    ConnectRetriesExhausted { attempts: usize },

    /// An update or removal referenced an event id that does not exist.
    #[error("event with id '{0}' does not exist")]
    MissingEventId(String),

    /// An update referenced a feed id that does not exist.
    #[error("feed with id '{0}' does not exist")]
    MissingFeedId(String),

    /// An event was persisted without its owning feed's metadata.
    #[error("event '{0}' has no feed metadata")]
    MissingFeed(String),

    /// A search page number past the end of the result set was requested.
    #[error("invalid page {0}")]
    InvalidPage(u32),

    /// A calendar date could not be resolved in the requested timezone.
    #[error("invalid date '{0}' in requested timezone")]
    InvalidDate(String),

    /// Core data-model error.
    #[error(transparent)]
    Core(#[from] chronolog_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
