//! Retry and timeout utilities
//!
//! Backoff calculation, deadline racing, HTTP error dispatch and the
//! diagnostic error sink shared by the chat client and the proxy.

use crate::config::RetryPolicy;
use crate::errors::{classify_status, ApiError, ErrorBody, ErrorKind};
use crate::http::HttpResponse;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::backtrace::Backtrace;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const TIMEOUT_MESSAGE: &str = "Request timed out";

/// Suspend the current task for `duration`
pub async fn delay(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Exponential backoff with jitter for a 1-based `attempt`.
///
/// `min(initial * 2^(attempt-1) + jitter, max)` with jitter drawn from
/// `[0, max_jitter)`.
pub fn calculate_retry_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    calculate_retry_delay_with(policy, attempt, &mut rand::thread_rng())
}

pub fn calculate_retry_delay_with<R: Rng + ?Sized>(
    policy: &RetryPolicy,
    attempt: u32,
    rng: &mut R,
) -> Duration {
    let exponent = attempt.max(1) - 1;
    let base = policy
        .initial_retry_delay
        .saturating_mul(2u32.saturating_pow(exponent));

    let max_jitter_ms = u64::try_from(policy.max_jitter.as_millis()).unwrap_or(u64::MAX);
    let jitter = if max_jitter_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rng.gen_range(0..max_jitter_ms))
    };

    base.saturating_add(jitter).min(policy.max_retry_delay)
}

/// Race `future` against a timer.
///
/// The losing future is dropped, which cancels it at its next await point.
pub async fn with_timeout<F: Future>(future: F, duration: Duration) -> Result<F::Output, ApiError> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ApiError::timeout(TIMEOUT_MESSAGE))
}

/// Like [`with_timeout`], but also signals `cancel` when the deadline passes
/// so work spawned elsewhere can stop cooperatively.
pub async fn with_deadline<F: Future>(
    future: F,
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<F::Output, ApiError> {
    tokio::select! {
        output = future => Ok(output),
        () = tokio::time::sleep(duration) => {
            cancel.cancel();
            Err(ApiError::timeout(TIMEOUT_MESSAGE))
        }
        () = cancel.cancelled() => Err(ApiError::network("Request cancelled")),
    }
}

/// Turn a non-2xx response into a classified error.
///
/// Takes the response by value so its body is consumed exactly once. A
/// `retry-after` header fills in when the body carries no hint.
pub fn dispatch_http_error(response: HttpResponse) -> ApiError {
    let HttpResponse {
        status,
        retry_after,
        body,
    } = response;

    let mut parsed = ErrorBody::from_slice(&body);
    if parsed.retry_after.is_none() {
        parsed.retry_after = retry_after.as_deref().and_then(parse_retry_after_header);
    }
    classify_status(status, &parsed)
}

/// `retry-after` is either delta-seconds or an HTTP date
fn parse_retry_after_header(value: &str) -> Option<f64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        return Some(seconds);
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let seconds = (date.with_timezone(&Utc) - Utc::now()).num_seconds().max(0);
    #[allow(clippy::cast_precision_loss)]
    let seconds = seconds as f64;
    Some(seconds)
}

/// Write an error to the operational log.
pub fn log_error(error: &ApiError) {
    let stack = Backtrace::capture();
    tracing::error!(
        name = error.name(),
        message = %error.message(),
        status = ?error.status(),
        code = %error.code(),
        timestamp = %error.timestamp_iso(),
        stack = %stack,
        "API error"
    );
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_retries` retries are spent. The operation receives the
/// 1-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt <= policy.max_retries && err.is_retryable(policy) => {
                let wait = backoff_for(policy, &err, attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = %wait.as_millis(),
                    code = %err.code(),
                    error = %err,
                    "Retrying after transient error"
                );
                delay(wait).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Rate limits wait at least as long as the server asked
fn backoff_for(policy: &RetryPolicy, err: &ApiError, attempt: u32) -> Duration {
    let computed = calculate_retry_delay(policy, attempt);
    match err.kind() {
        ErrorKind::RateLimit { retry_after } => computed.max(retry_after),
        _ => computed,
    }
}
