//! Error types shared across the chronolog crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the core data model.
#[derive(Error, Debug)]
pub enum Error {
    /// An unknown field name was used as a dedup key.
    #[error("invalid field '{0}'")]
    InvalidField(String),

    /// A pagination cursor could not be parsed.
    #[error("unrecognized cursor format: '{0}'")]
    InvalidCursor(String),
}
