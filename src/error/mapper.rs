//! Error mapping utilities for HTTP status codes and API responses.

use serde::Deserialize;
use std::time::Duration;

use super::categories::ApiError;

/// Structured error body returned by most JSON APIs (`{"error": {...}}`).
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    /// Error payload.
    pub error: ApiErrorDetail,
}

/// Detailed error information from an API.
#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    /// Numeric error code.
    #[serde(default)]
    pub code: Option<i64>,
    /// Human-readable message.
    pub message: String,
    /// Symbolic status such as `RESOURCE_EXHAUSTED`.
    #[serde(default)]
    pub status: Option<String>,
}

/// Maps an HTTP status and raw response body to an [`ApiError`].
///
/// The body is parsed as `{"error": {"message": ..., "status": ...}}` when
/// possible and used verbatim otherwise.
pub fn map_http_status_with_body(
    status: u16,
    body: &[u8],
    retry_after: Option<Duration>,
) -> ApiError {
    match serde_json::from_slice::<ApiErrorResponse>(body) {
        Ok(response) => {
            let exhausted = response
                .error
                .status
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("RESOURCE_EXHAUSTED"));
            if exhausted {
                ApiError::QuotaExceeded { retry_after }
            } else {
                map_http_status(status, response.error.message, retry_after)
            }
        }
        Err(_) => map_http_status(
            status,
            String::from_utf8_lossy(body).into_owned(),
            retry_after,
        ),
    }
}

/// Maps an HTTP status code and message to an [`ApiError`].
///
/// Any message mentioning a quota is treated as quota exhaustion, the same
/// signal that opens the circuit for 429 responses.
pub fn map_http_status(status: u16, message: String, retry_after: Option<Duration>) -> ApiError {
    if mentions_quota(&message) && (status == 403 || status == 429) {
        return ApiError::QuotaExceeded { retry_after };
    }

    match status {
        // 408 Request Timeout
        408 => ApiError::Timeout {
            duration: Duration::ZERO,
        },

        // 429 Too Many Requests
        429 => ApiError::RateLimited { retry_after },

        500..=599 => ApiError::Server { status, message },

        _ => ApiError::Client { status, message },
    }
}

/// Parses a `Retry-After` header value given in seconds.
///
/// HTTP-date values are not supported and yield `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn mentions_quota(message: &str) -> bool {
    message.to_lowercase().contains("quota")
}
