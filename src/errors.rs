//! Error taxonomy
//!
//! Every failure the chat client or the proxy can observe is folded into one
//! [`ApiError`] with a closed [`ErrorKind`]. [`classify_status`] is the single
//! mapping from an HTTP status (plus an optional error body) to a kind.

use crate::config::RetryPolicy;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Seconds to wait after a 429 that carries no retry hint
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Status reported by every timeout error
pub const TIMEOUT_STATUS: u16 = 408;

/// Semantic category of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied an invalid request
    Validation,
    /// Credential missing, invalid or lacking permission (401, 403)
    Authentication,
    /// Throttled by the remote service
    RateLimit { retry_after: Duration },
    /// Operation missed its deadline
    Timeout,
    /// Remote service failure (5xx) - transient
    Server,
    /// Any other status, transport failure or malformed body
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::RateLimit { .. } => "rate_limit",
            Self::Timeout => "timeout",
            Self::Server => "server",
            Self::Unknown => "unknown",
        }
    }
}

/// Symbolic error code attached to every error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    AuthenticationError,
    RateLimitError,
    TimeoutError,
    ServerError,
    NotFound,
    UnknownError,
    /// Transport failed before any HTTP status was received
    NetworkError,
    /// 2xx response whose body lacked the expected shape
    InvalidResponse,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::AuthenticationError => "AUTHENTICATION_ERROR",
            Self::RateLimitError => "RATE_LIMIT_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::ServerError => "SERVER_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::UnknownError => "UNKNOWN_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::InvalidResponse => "INVALID_RESPONSE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified API error
///
/// Fields are only reachable through accessors, so an error never changes
/// after construction.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    code: ErrorCode,
    timestamp: DateTime<Utc>,
}

impl ApiError {
    fn new(
        kind: ErrorKind,
        code: ErrorCode,
        message: impl Into<String>,
        status: Option<u16>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            status,
            code,
            timestamp: Utc::now(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, ErrorCode::ValidationError, message, Some(400))
    }

    pub fn authentication(message: impl Into<String>, status: u16) -> Self {
        Self::new(
            ErrorKind::Authentication,
            ErrorCode::AuthenticationError,
            message,
            Some(status),
        )
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::new(
            ErrorKind::RateLimit { retry_after },
            ErrorCode::RateLimitError,
            message,
            Some(429),
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Timeout,
            ErrorCode::TimeoutError,
            message,
            Some(TIMEOUT_STATUS),
        )
    }

    pub fn server(message: impl Into<String>, status: u16) -> Self {
        Self::new(ErrorKind::Server, ErrorCode::ServerError, message, Some(status))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, ErrorCode::NotFound, message, Some(404))
    }

    pub fn unknown(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::new(ErrorKind::Unknown, ErrorCode::UnknownError, message, status)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, ErrorCode::NetworkError, message, None)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, ErrorCode::InvalidResponse, message, None)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Creation instant as ISO-8601 with millisecond precision
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind {
            ErrorKind::RateLimit { retry_after } => Some(retry_after),
            _ => None,
        }
    }

    /// Error class name used in diagnostics
    pub fn name(&self) -> &'static str {
        match self.kind {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Authentication => "AuthenticationError",
            ErrorKind::RateLimit { .. } => "RateLimitError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Server => "ServerError",
            ErrorKind::Unknown => "APIError",
        }
    }

    pub fn is_retryable(&self, policy: &RetryPolicy) -> bool {
        if self
            .status
            .is_some_and(|status| policy.is_retryable_status(status))
        {
            return true;
        }
        matches!(
            self.kind,
            ErrorKind::Timeout | ErrorKind::RateLimit { .. } | ErrorKind::Server
        )
    }

    /// Copy shown to the user instead of the raw error
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::Validation => format!("Please check your message: {}", self.message),
            ErrorKind::Authentication => {
                "Authentication failed. Check that your Codestral API key is set and valid."
                    .to_string()
            }
            ErrorKind::RateLimit { retry_after } => format!(
                "Too many requests. Please wait {} seconds before trying again.",
                retry_after.as_secs().max(1)
            ),
            ErrorKind::Timeout => "The request took too long. Please try again.".to_string(),
            ErrorKind::Server => {
                "The assistant is temporarily unavailable. Please try again shortly.".to_string()
            }
            ErrorKind::Unknown => {
                "Something went wrong while contacting the assistant.".to_string()
            }
        }
    }
}

/// Error payload of a non-2xx response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorBody {
    pub error: Option<String>,
    /// Seconds, as sent by the server
    pub retry_after: Option<f64>,
}

impl ErrorBody {
    /// Read an error body leniently.
    ///
    /// Accepts the local proxy's `{"error": "..."}` shape as well as the
    /// upstream shapes `{"error": {"message": "..."}}`, `{"message": "..."}`
    /// and `{"detail": "..."}`.
    pub fn from_value(value: &Value) -> Self {
        let error = value
            .get("error")
            .and_then(|e| {
                e.as_str()
                    .or_else(|| e.get("message").and_then(Value::as_str))
            })
            .or_else(|| value.get("message").and_then(Value::as_str))
            .or_else(|| value.get("detail").and_then(Value::as_str))
            .map(str::to_string);

        let retry_after = value
            .get("retry_after")
            .or_else(|| value.get("error").and_then(|e| e.get("retry_after")))
            .and_then(Value::as_f64);

        Self { error, retry_after }
    }

    /// Parse raw bytes, falling back to an empty body
    pub fn from_slice(bytes: &[u8]) -> Self {
        serde_json::from_slice::<Value>(bytes)
            .map(|value| Self::from_value(&value))
            .unwrap_or_default()
    }
}

fn retry_after_duration(seconds: Option<f64>) -> Duration {
    seconds
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .unwrap_or(Duration::from_secs(DEFAULT_RETRY_AFTER_SECS))
}

/// Map an HTTP status and its error body to an error.
///
/// Total and free of I/O; there is no success path.
pub fn classify_status(status: u16, body: &ErrorBody) -> ApiError {
    let error = body.error.clone();
    match status {
        400 => ApiError::validation(error.unwrap_or_else(|| "invalid request parameters".into())),
        401 => ApiError::authentication("authentication failed", 401),
        403 => ApiError::authentication("access denied; check API key permissions", 403),
        404 => ApiError::not_found("resource not found"),
        429 => ApiError::rate_limit(
            error.unwrap_or_else(|| "rate limit exceeded".into()),
            retry_after_duration(body.retry_after),
        ),
        500 | 502 | 503 | 504 => ApiError::server(
            error.unwrap_or_else(|| "service temporarily unavailable".into()),
            status,
        ),
        _ => ApiError::unknown("unexpected error", Some(status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn body(error: Option<&str>, retry_after: Option<f64>) -> ErrorBody {
        ErrorBody {
            error: error.map(str::to_string),
            retry_after,
        }
    }

    #[test]
    fn test_server_statuses_classify_as_server() {
        for status in [500, 502, 503, 504] {
            let err = classify_status(status, &ErrorBody::default());
            assert_eq!(err.kind(), ErrorKind::Server, "status {status}");
            assert_eq!(err.status(), Some(status));
            assert_eq!(err.code(), ErrorCode::ServerError);
            assert_eq!(err.message(), "service temporarily unavailable");
        }
    }

    #[test]
    fn test_server_uses_body_message() {
        let err = classify_status(503, &body(Some("upstream overloaded"), None));
        assert_eq!(err.message(), "upstream overloaded");
    }

    #[test]
    fn test_rate_limit_retry_after_from_body() {
        let err = classify_status(429, &body(Some("slow down"), Some(30.0)));
        assert_eq!(
            err.kind(),
            ErrorKind::RateLimit {
                retry_after: Duration::from_secs(30)
            }
        );
        assert_eq!(err.message(), "slow down");
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn test_rate_limit_fractional_retry_after() {
        let err = classify_status(429, &body(None, Some(2.5)));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_rate_limit_defaults_to_sixty_seconds() {
        let err = classify_status(429, &ErrorBody::default());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
        assert_eq!(err.message(), "rate limit exceeded");
    }

    #[test]
    fn test_rate_limit_rejects_negative_hint() {
        let err = classify_status(429, &body(None, Some(-5.0)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_validation_status() {
        let err = classify_status(400, &ErrorBody::default());
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.message(), "invalid request parameters");

        let err = classify_status(400, &body(Some("messages are required"), None));
        assert_eq!(err.message(), "messages are required");
    }

    #[test]
    fn test_auth_statuses() {
        let err = classify_status(401, &body(Some("ignored"), None));
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.message(), "authentication failed");
        assert_eq!(err.status(), Some(401));

        let err = classify_status(403, &ErrorBody::default());
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.message(), "access denied; check API key permissions");
        assert_eq!(err.status(), Some(403));
    }

    #[test]
    fn test_not_found() {
        let err = classify_status(404, &ErrorBody::default());
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn test_unexpected_status_keeps_status() {
        let err = classify_status(418, &body(Some("teapot"), None));
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.code(), ErrorCode::UnknownError);
        assert_eq!(err.status(), Some(418));
        assert_eq!(err.message(), "unexpected error");
    }

    #[test]
    fn test_timeout_has_fixed_status() {
        let err = ApiError::timeout("Request timed out");
        assert_eq!(err.status(), Some(TIMEOUT_STATUS));
        assert_eq!(err.code().as_str(), "TIMEOUT_ERROR");
        assert_eq!(err.name(), "TimeoutError");
    }

    #[test]
    fn test_error_body_shapes() {
        assert_eq!(
            ErrorBody::from_value(&json!({"error": "bad", "retry_after": 12})),
            body(Some("bad"), Some(12.0))
        );
        assert_eq!(
            ErrorBody::from_value(&json!({"error": {"message": "nested", "retry_after": 3}})),
            body(Some("nested"), Some(3.0))
        );
        assert_eq!(
            ErrorBody::from_value(&json!({"object": "error", "message": "Unauthorized"})),
            body(Some("Unauthorized"), None)
        );
        assert_eq!(
            ErrorBody::from_value(&json!({"detail": "Not Found"})),
            body(Some("Not Found"), None)
        );
        assert_eq!(ErrorBody::from_slice(b"<html>oops</html>"), ErrorBody::default());
    }

    #[test]
    fn test_retryable_classification() {
        let policy = RetryPolicy::default();
        assert!(ApiError::timeout("t").is_retryable(&policy));
        assert!(ApiError::server("s", 503).is_retryable(&policy));
        assert!(ApiError::rate_limit("r", Duration::from_secs(1)).is_retryable(&policy));
        assert!(!ApiError::validation("v").is_retryable(&policy));
        assert!(!ApiError::authentication("a", 401).is_retryable(&policy));
        assert!(!ApiError::not_found("n").is_retryable(&policy));
        assert!(!ApiError::invalid_response("i").is_retryable(&policy));
    }

    #[test]
    fn test_user_message_is_kind_specific() {
        let auth = ApiError::authentication("authentication failed", 401).user_message();
        let unknown = ApiError::unknown("unexpected error", Some(418)).user_message();
        assert!(auth.contains("API key"));
        assert_ne!(auth, unknown);
        assert!(ApiError::rate_limit("r", Duration::from_secs(30))
            .user_message()
            .contains("30 seconds"));
    }

    #[test]
    fn test_timestamp_is_iso8601() {
        let err = ApiError::network("connection refused");
        let parsed = DateTime::parse_from_rfc3339(&err.timestamp_iso()).unwrap();
        assert_eq!(parsed.timestamp_millis(), err.timestamp().timestamp_millis());
    }

    proptest! {
        #[test]
        fn classification_always_keeps_the_status(status in 100u16..600) {
            let err = classify_status(status, &ErrorBody::default());
            match status {
                404 => prop_assert_eq!(err.code(), ErrorCode::NotFound),
                500 | 502 | 503 | 504 => prop_assert_eq!(err.kind(), ErrorKind::Server),
                _ => {}
            }
            prop_assert_eq!(err.status(), Some(status));
        }

        #[test]
        fn rate_limit_hint_round_trips(secs in 0u32..86_400) {
            let err = classify_status(429, &body(None, Some(f64::from(secs))));
            prop_assert_eq!(err.retry_after(), Some(Duration::from_secs(u64::from(secs))));
        }
    }
}
