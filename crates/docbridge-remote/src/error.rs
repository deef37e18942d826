//! Remote platform error classification.

use docbridge_core::{defaults, Error};

/// Remote error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorCode {
    /// Access token expired or invalid.
    TokenExpired,
    /// Rate limit exceeded.
    RateLimited,
    /// Resource not found or already deleted.
    NotFound,
    /// Server error.
    ServerError,
    /// Any other non-zero business code or HTTP failure.
    Other,
}

impl RemoteErrorCode {
    /// Determine the category from HTTP status and business code.
    pub fn classify(status: u16, code: i64) -> Self {
        if defaults::TOKEN_EXPIRED_CODES.contains(&code) || status == 401 {
            Self::TokenExpired
        } else if status == 429 || code == defaults::RATE_LIMIT_CODE {
            Self::RateLimited
        } else if status == 404 || defaults::FILE_GONE_CODES.contains(&code) {
            Self::NotFound
        } else if (500..=599).contains(&status) {
            Self::ServerError
        } else {
            Self::Other
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Convert a failed response into the core error type.
pub fn to_error(status: u16, code: i64, message: &str) -> Error {
    match RemoteErrorCode::classify(status, code) {
        RemoteErrorCode::TokenExpired => Error::TokenExpired {
            code,
            msg: message.to_string(),
        },
        RemoteErrorCode::RateLimited => {
            Error::RateLimited(format!("HTTP {} code {}: {}", status, code, message))
        }
        RemoteErrorCode::NotFound => {
            Error::NotFound(format!("HTTP {} code {}: {}", status, code, message))
        }
        RemoteErrorCode::ServerError if code == 0 => {
            Error::Request(format!("HTTP {}: {}", status, message))
        }
        RemoteErrorCode::ServerError | RemoteErrorCode::Other => Error::Api {
            code: if code == 0 { i64::from(status) } else { code },
            msg: message.to_string(),
        },
    }
}
