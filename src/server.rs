//! Local chat proxy
//!
//! Serves the chat endpoint the client talks to, a WebSocket channel for the
//! connection manager, and a health check. Completions come from a
//! [`ChatUpstream`].

mod handlers;
mod types;
mod upstream;
mod ws;

#[cfg(test)]
pub mod testing;

pub use handlers::create_router;
pub use types::{ErrorResponse, HealthResponse};
pub use upstream::{ChatUpstream, CodestralService, LoggingUpstream, UnconfiguredUpstream};

use crate::config::ServerConfig;
use crate::http::{ReqwestTransport, TransportError};
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn ChatUpstream>,
}

impl AppState {
    pub fn new(upstream: Arc<dyn ChatUpstream>) -> Self {
        Self { upstream }
    }

    /// Build the Codestral upstream, or a stub that rejects every request
    /// when no API key is configured
    pub fn from_config(config: &ServerConfig) -> Result<Self, TransportError> {
        let inner: Arc<dyn ChatUpstream> = match &config.codestral_api_key {
            Some(key) => {
                let transport = ReqwestTransport::new()?.with_bearer(key.clone());
                Arc::new(CodestralService::new(
                    transport,
                    config.codestral_api_url.clone(),
                    config.codestral_model.clone(),
                    config.policy.timeout,
                ))
            }
            None => {
                tracing::warn!("CODESTRAL_API_KEY is not set; chat requests will be rejected");
                Arc::new(UnconfiguredUpstream::new(config.codestral_model.clone()))
            }
        };
        Ok(Self::new(Arc::new(LoggingUpstream::new(inner))))
    }
}
