//! Chat request client

use super::types::{completion_content, ChatReply, ChatRequest};
use crate::config::{ChatClientConfig, ValidationMode};
use crate::errors::ApiError;
use crate::http::HttpTransport;
use crate::retry::{dispatch_http_error, log_error, retry_with_backoff, with_timeout};
use serde_json::Value;

/// Check a user message before anything touches the network.
///
/// The length limit counts characters of the untrimmed message in both modes.
pub fn validate_message(
    message: &str,
    mode: ValidationMode,
    max_chars: usize,
) -> Result<(), ApiError> {
    let candidate = match mode {
        ValidationMode::Strict => message.trim(),
        ValidationMode::Lenient => message,
    };
    if candidate.is_empty() {
        return Err(ApiError::validation("message cannot be empty"));
    }
    if message.chars().count() > max_chars {
        return Err(ApiError::validation(format!(
            "message exceeds maximum length of {max_chars} characters"
        )));
    }
    Ok(())
}

/// Sends single-message conversations to the chat endpoint
pub struct ChatClient<T> {
    transport: T,
    config: ChatClientConfig,
}

impl<T: HttpTransport> ChatClient<T> {
    pub fn new(transport: T, config: ChatClientConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ChatClientConfig {
        &self.config
    }

    pub fn validate(&self, message: &str) -> Result<(), ApiError> {
        validate_message(message, self.config.validation, self.config.max_message_chars)
    }

    /// Send one message and return the assistant's reply.
    ///
    /// Makes at most one network call; failures are logged once and returned
    /// unchanged.
    pub async fn send_chat_message(&self, message: &str) -> Result<ChatReply, ApiError> {
        let result = match self.validate(message) {
            Ok(()) => self.execute(message).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            log_error(err);
        }
        result
    }

    /// Entry point for dynamically typed input, e.g. a JSON request field
    pub async fn send_chat_value(&self, message: &Value) -> Result<ChatReply, ApiError> {
        match message.as_str() {
            Some(text) => self.send_chat_message(text).await,
            None => {
                let err = ApiError::validation("message must be a string");
                log_error(&err);
                Err(err)
            }
        }
    }

    /// Validate once, then retry transient failures per the configured policy
    pub async fn send_chat_message_with_retry(&self, message: &str) -> Result<ChatReply, ApiError> {
        let result = match self.validate(message) {
            Ok(()) => retry_with_backoff(&self.config.policy, |_| self.execute(message)).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            log_error(err);
        }
        result
    }

    async fn execute(&self, message: &str) -> Result<ChatReply, ApiError> {
        let request = ChatRequest::single_user(message);
        let body = serde_json::to_value(&request)
            .map_err(|e| ApiError::unknown(format!("Failed to encode request: {e}"), None))?;

        tracing::debug!(
            endpoint = %self.config.endpoint,
            chars = message.chars().count(),
            "Sending chat message"
        );

        let response = with_timeout(
            self.transport.post_json(&self.config.endpoint, &body),
            self.config.policy.timeout,
        )
        .await??;

        if !response.is_success() {
            return Err(dispatch_http_error(response));
        }

        let parsed: Value = serde_json::from_slice(&response.body)
            .map_err(|_| ApiError::invalid_response("invalid response format"))?;
        let content = completion_content(&parsed)
            .ok_or_else(|| ApiError::invalid_response("invalid response format"))?;

        Ok(ChatReply {
            response: content.to_string(),
        })
    }
}
