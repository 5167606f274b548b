//! Scripted upstream for proxy tests

use super::ChatUpstream;
use crate::chat::ChatMessage;
use crate::errors::ApiError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Upstream that returns queued results and records each conversation
#[derive(Default)]
pub struct StubUpstream {
    results: Mutex<VecDeque<Result<Value, ApiError>>>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
    delay: Option<Duration>,
}

impl StubUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long before answering each request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queue(&self, result: Result<Value, ApiError>) {
        self.results.lock().unwrap().push_back(result);
    }

    /// Queue a completion whose first choice says `content`
    pub fn queue_reply(&self, content: &str) {
        self.queue(Ok(json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })));
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatUpstream for StubUpstream {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Value, ApiError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::network("No stub result queued")))
    }

    fn model_id(&self) -> &str {
        "stub"
    }
}
