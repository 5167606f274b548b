//! Runtime configuration
//!
//! Each struct has defaults matching the dashboard's behaviour and a
//! `from_env()` constructor for deployment overrides.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CHAT_ENDPOINT: &str = "http://127.0.0.1:3000/api/chat";
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:3000/ws";
pub const DEFAULT_CODESTRAL_URL: &str = "https://codestral.mistral.ai/v1/chat/completions";
pub const DEFAULT_CODESTRAL_MODEL: &str = "codestral-latest";
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Timeout, retry count and backoff constants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Upper bound (exclusive) of the random jitter added to each delay
    pub max_jitter: Duration,
    pub retryable_status_codes: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            max_retries: 3,
            initial_retry_delay: Duration::from_millis(1_000),
            max_retry_delay: Duration::from_millis(10_000),
            max_jitter: Duration::from_millis(1_000),
            retryable_status_codes: [408, 429, 500, 502, 503, 504].into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            timeout: millis(&lookup, "DEVDASH_TIMEOUT_MS").unwrap_or(defaults.timeout),
            max_retries: parse(&lookup, "DEVDASH_MAX_RETRIES").unwrap_or(defaults.max_retries),
            ..defaults
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }
}

/// How strictly chat messages are checked for emptiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Whitespace-only messages are rejected
    #[default]
    Strict,
    /// Only the empty string is rejected
    Lenient,
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(format!("unknown validation mode: {other}")),
        }
    }
}

/// Configuration for [`crate::chat::ChatClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatClientConfig {
    pub endpoint: String,
    pub policy: RetryPolicy,
    pub validation: ValidationMode,
    pub max_message_chars: usize,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CHAT_ENDPOINT.to_string(),
            policy: RetryPolicy::default(),
            validation: ValidationMode::default(),
            max_message_chars: MAX_MESSAGE_CHARS,
        }
    }
}

impl ChatClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            endpoint: lookup("DEVDASH_CHAT_ENDPOINT").unwrap_or(defaults.endpoint),
            policy: RetryPolicy::from_lookup(&lookup),
            validation: parse(&lookup, "DEVDASH_VALIDATION").unwrap_or(defaults.validation),
            max_message_chars: defaults.max_message_chars,
        }
    }
}

/// Reconnection settings for [`crate::connection::ConnectionManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub max_reconnect_attempts: u32,
    /// Fixed wait before each reconnection attempt
    pub reconnect_delay: Duration,
    pub connection_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1_000),
            connection_timeout: Duration::from_millis(10_000),
        }
    }
}

impl ConnectionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_reconnect_attempts: parse(&lookup, "DEVDASH_RECONNECT_ATTEMPTS")
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_delay: millis(&lookup, "DEVDASH_RECONNECT_DELAY_MS")
                .unwrap_or(defaults.reconnect_delay),
            connection_timeout: millis(&lookup, "DEVDASH_CONNECT_TIMEOUT_MS")
                .unwrap_or(defaults.connection_timeout),
        }
    }
}

/// Configuration for the local chat proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub codestral_api_key: Option<String>,
    pub codestral_api_url: String,
    pub codestral_model: String,
    pub policy: RetryPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            codestral_api_key: None,
            codestral_api_url: DEFAULT_CODESTRAL_URL.to_string(),
            codestral_model: DEFAULT_CODESTRAL_MODEL.to_string(),
            policy: RetryPolicy::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parse(&lookup, "DEVDASH_PORT").unwrap_or(defaults.port),
            // An empty key is treated as unset
            codestral_api_key: lookup("CODESTRAL_API_KEY").filter(|k| !k.trim().is_empty()),
            codestral_api_url: lookup("CODESTRAL_API_URL").unwrap_or(defaults.codestral_api_url),
            codestral_model: lookup("CODESTRAL_MODEL").unwrap_or(defaults.codestral_model),
            policy: RetryPolicy::from_lookup(&lookup),
        }
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    parse::<u64>(lookup, key).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_retry_delay, Duration::from_secs(1));
        assert_eq!(policy.max_retry_delay, Duration::from_secs(10));
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(policy.is_retryable_status(status));
        }
        assert!(!policy.is_retryable_status(404));
    }

    #[test]
    fn test_connection_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides_from_lookup() {
        let env = lookup(&[
            ("DEVDASH_TIMEOUT_MS", "5000"),
            ("DEVDASH_RECONNECT_ATTEMPTS", "2"),
            ("DEVDASH_VALIDATION", "Lenient"),
            ("DEVDASH_CHAT_ENDPOINT", "http://localhost:9999/api/chat"),
        ]);

        let client = ChatClientConfig::from_lookup(&env);
        assert_eq!(client.policy.timeout, Duration::from_secs(5));
        assert_eq!(client.validation, ValidationMode::Lenient);
        assert_eq!(client.endpoint, "http://localhost:9999/api/chat");
        assert_eq!(client.max_message_chars, MAX_MESSAGE_CHARS);

        let connection = ConnectionConfig::from_lookup(&env);
        assert_eq!(connection.max_reconnect_attempts, 2);
        assert_eq!(connection.reconnect_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_bad_values_fall_back_to_defaults() {
        let env = lookup(&[("DEVDASH_PORT", "not-a-port"), ("CODESTRAL_API_KEY", "  ")]);
        let server = ServerConfig::from_lookup(&env);
        assert_eq!(server.port, 3000);
        assert_eq!(server.codestral_api_key, None);
        assert_eq!(server.codestral_model, DEFAULT_CODESTRAL_MODEL);
    }
}
