//! Core error types.

use thiserror::Error;

/// Errors raised by the document store and the sync machinery.
#[derive(Debug, Error)]
pub enum Error {
    /// Resource name is malformed or would resolve outside the store root.
    #[error("invalid resource name: {0}")]
    InvalidName(String),

    /// Resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Stored bytes are not valid JSON.
    #[error("JSON decode failed for {name}: {source}")]
    Corrupt {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The OS watch primitive could not be set up.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
