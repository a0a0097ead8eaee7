//! HTTP outcome → [`InferenceError`] classification.

use std::time::Duration;

use pipeline::InferenceError;
use reqwest::StatusCode;

/// Upper bound on error-body text kept in an error message.
const MAX_MESSAGE_LEN: usize = 512;

/// Classifies a non-success status.
///
/// | Status | Kind |
/// |--------|------|
/// | 429 | `rate_limited` (with the `Retry-After` hint) |
/// | 408, 504 | `timeout` |
/// | other 5xx | `server_error` |
/// | other 4xx | `bad_request` |
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
    attempt_timeout: Duration,
) -> InferenceError {
    let message = truncate(body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => InferenceError::RateLimited { retry_after },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => InferenceError::Timeout {
            after: attempt_timeout,
        },
        s if s.is_server_error() => InferenceError::ServerError {
            status: Some(s.as_u16()),
            message,
        },
        s => InferenceError::BadRequest {
            message: format!("HTTP {}: {message}", s.as_u16()),
        },
    }
}

/// Classifies a failure that produced no HTTP status.
pub fn classify_transport(error: &reqwest::Error, attempt_timeout: Duration) -> InferenceError {
    if error.is_timeout() {
        InferenceError::Timeout {
            after: attempt_timeout,
        }
    } else if error.is_builder() {
        InferenceError::BadRequest {
            message: error.to_string(),
        }
    } else {
        InferenceError::ServerError {
            status: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }
}

/// Parses a `Retry-After` header given in delta-seconds.
///
/// HTTP-date values are not interpreted; the caller's own backoff applies.
/// Values too large for a `Duration` saturate; the retry policy caps them.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let secs = value
        .parse::<f64>()
        .ok()
        .filter(|s| !s.is_nan() && *s >= 0.0)?;
    Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_MESSAGE_LEN) {
        Some((end, _)) => format!("{}…", &body[..end]),
        None => body.to_string(),
    }
}
