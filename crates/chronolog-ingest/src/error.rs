//! Error types for the ingestion engine.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A non-success status the source's recovery hook did not handle.
    #[error("received status {status} for url \"{url}\"")]
    HttpStatus { status: u16, url: String },

    /// Two consecutive retry signals for the same request; the source's
    /// recovery hook is not converging.
    #[error("request retry loop detected for url \"{url}\"")]
    RetryLoop { url: String },

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Store error.
    #[error(transparent)]
    Store(#[from] chronolog_store::Error),

    /// Core data-model error.
    #[error(transparent)]
    Core(#[from] chronolog_core::Error),

    /// Source-level parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Media enrichment failure.
    #[error("enrichment error: {0}")]
    Enrich(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
