//! Origin API error types.

use thiserror::Error;

/// Result type for origin API operations.
pub type OriginResult<T> = Result<T, OriginError>;

/// Errors that can occur talking to the origin API.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Reel not found: {0}")]
    NotFound(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl OriginError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Classify a non-success HTTP status.
    pub fn from_http_status(status: u16, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match status {
            404 => Self::NotFound(msg),
            429 => Self::RateLimited(msg),
            408 | 500..=599 => Self::ServerError(status, msg),
            _ => Self::RequestFailed(format!("HTTP {}: {}", status, msg)),
        }
    }

    /// HTTP status behind this error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::NotFound(_) => Some(404),
            Self::RateLimited(_) => Some(429),
            Self::ServerError(status, _) => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Check if error is retryable.
    ///
    /// Network failures, timeouts, 429 and 5xx are; other 4xx, malformed
    /// bodies and failed validation are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::ServerError(..) => true,
            Self::Network(e) => !e.is_decode() && !e.is_builder(),
            _ => false,
        }
    }
}
