//! Completion providers behind the proxy

use crate::chat::ChatMessage;
use crate::errors::ApiError;
use crate::http::HttpTransport;
use crate::retry::{dispatch_http_error, with_timeout};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Produces a chat completion body for a conversation
#[async_trait]
pub trait ChatUpstream: Send + Sync {
    /// Returns the provider's JSON body unchanged on success
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Value, ApiError>;

    fn model_id(&self) -> &str;
}

/// Codestral chat completions API
pub struct CodestralService<T> {
    transport: T,
    url: String,
    model: String,
    timeout: Duration,
}

impl<T: HttpTransport> CodestralService<T> {
    pub fn new(transport: T, url: String, model: String, timeout: Duration) -> Self {
        Self {
            transport,
            url,
            model,
            timeout,
        }
    }
}

#[async_trait]
impl<T: HttpTransport> ChatUpstream for CodestralService<T> {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Value, ApiError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
        });

        let response =
            with_timeout(self.transport.post_json(&self.url, &body), self.timeout).await??;
        if !response.is_success() {
            return Err(dispatch_http_error(response));
        }

        serde_json::from_slice(&response.body)
            .map_err(|_| ApiError::invalid_response("invalid response format"))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Stand-in used when no API key is configured
pub struct UnconfiguredUpstream {
    model: String,
}

impl UnconfiguredUpstream {
    pub fn new(model: String) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ChatUpstream for UnconfiguredUpstream {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<Value, ApiError> {
        Err(ApiError::authentication("CODESTRAL_API_KEY is not set", 401))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Logging wrapper for upstreams
pub struct LoggingUpstream {
    inner: Arc<dyn ChatUpstream>,
    model_id: String,
}

impl LoggingUpstream {
    pub fn new(inner: Arc<dyn ChatUpstream>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl ChatUpstream for LoggingUpstream {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Value, ApiError> {
        let start = Instant::now();
        let result = self.inner.complete(messages).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    messages = messages.len(),
                    "Upstream request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    kind = e.kind().as_str(),
                    status = ?e.status(),
                    error = %e,
                    "Upstream request failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
