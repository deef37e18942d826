//! Error types for docbridge.

use thiserror::Error;

/// Result type alias using docbridge's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for docbridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No usable credential (missing token, re-authorization timed out)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The remote platform rejected the access token as expired or invalid
    #[error("Token expired (code {code}): {msg}")]
    TokenExpired { code: i64, msg: String },

    /// Remote rate limit hit (HTTP 429 or a rate-limit business code)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Remote resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote platform returned a non-zero business code
    #[error("API error (code {code}): {msg}")]
    Api { code: i64, msg: String },

    /// Response body did not match the expected schema
    #[error("Decode error: {0}")]
    Decode(String),

    /// The import job reached a terminal failure
    #[error("Import failed: {0}")]
    ImportFailed(String),

    /// Conversion of an uploaded source failed; the source file was kept
    #[error("{source}")]
    Conversion {
        file_token: String,
        source: Box<Error>,
    },

    /// A bounded wait ran out
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited(_))
    }

    /// Whether the error means the access token must be refreshed or re-acquired.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::TokenExpired { .. } | Error::Unauthorized(_))
    }

    /// Drive token of a source file left in place by a failed conversion.
    pub fn kept_source(&self) -> Option<&str> {
        match self {
            Error::Conversion { file_token, .. } => Some(file_token),
            _ => None,
        }
    }

    /// Whether the error means the remote object does not exist (anymore).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
