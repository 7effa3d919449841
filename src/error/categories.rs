//! Error category types for granular error handling.

use std::time::Duration;
use thiserror::Error;

use super::types::Classify;

/// Configuration-related errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A field is outside its allowed range.
    #[error("Invalid configuration: {field} {message}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// An environment variable is set but cannot be parsed.
    #[error("Invalid environment variable {name}: {value:?}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// Raw value.
        value: String,
    },

    /// A JSON configuration document is malformed.
    #[error("Invalid configuration document: {message}")]
    InvalidDocument {
        /// Parser message.
        message: String,
    },
}

impl From<serde_json::Error> for ConfigurationError {
    fn from(err: serde_json::Error) -> Self {
        ConfigurationError::InvalidDocument {
            message: err.to_string(),
        }
    }
}

/// Classified failure of an outbound HTTP-style API call.
///
/// Integrations that talk to a REST API can map their transport errors into
/// this type (see [`map_http_status`](super::map_http_status)) and get the
/// retry and circuit-breaker classification for free.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The connection failed or was reset.
    #[error("Connection failed: {message}")]
    Network {
        /// Transport message.
        message: String,
    },

    /// The request timed out.
    #[error("Request timed out after {duration:?}")]
    Timeout {
        /// Elapsed time before giving up.
        duration: Duration,
    },

    /// HTTP 429.
    #[error("Too many requests")]
    RateLimited {
        /// Server-provided wait, if any.
        retry_after: Option<Duration>,
    },

    /// The account quota is exhausted.
    #[error("Quota exceeded")]
    QuotaExceeded {
        /// Server-provided wait, if any.
        retry_after: Option<Duration>,
    },

    /// HTTP 5xx.
    #[error("Server error {status}: {message}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Response message.
        message: String,
    },

    /// HTTP 4xx other than 408 and 429.
    #[error("Client error {status}: {message}")]
    Client {
        /// HTTP status.
        status: u16,
        /// Response message.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("Failed to parse response: {message}")]
    Parse {
        /// Parser message.
        message: String,
    },
}

impl ApiError {
    /// Returns the HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::RateLimited { .. } | ApiError::QuotaExceeded { .. } => Some(429),
            ApiError::Server { status, .. } | ApiError::Client { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Classify for ApiError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Network { .. } | ApiError::Timeout { .. } | ApiError::Server { .. }
        )
    }

    fn is_quota_exceeded(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. } | ApiError::QuotaExceeded { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after } | ApiError::QuotaExceeded { retry_after } => {
                *retry_after
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Parse {
            message: err.to_string(),
        }
    }
}
