//! Error types for quarry-core

use thiserror::Error;

/// Main error type for the quarry-core library
///
/// Variants are cheap to clone so a failed fetch can be stored on its
/// cache entry and handed to every subscriber of that entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Network failure or server-side (5xx) error; retryable by the user
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend rejected the request (4xx); detail comes verbatim from the server
    #[error("{detail}")]
    Validation { status: u16, detail: String },

    /// Resource does not exist on the backend
    #[error("not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Malformed URL query string
    #[error("invalid query string: {0}")]
    QueryString(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// True for errors the user may retry (network and 5xx failures).
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// True when the backend reported the resource as gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Result type alias for quarry-core
pub type Result<T> = std::result::Result<T, Error>;
