//! devdash - resilient chat client and connection management for the
//! developer dashboard
//!
//! The chat client classifies every failure into an [`errors::ApiError`],
//! retries transient ones with jittered backoff and never calls the network
//! with invalid input. The connection manager keeps one persistent socket
//! alive with a bounded reconnection budget. The proxy server fronts the
//! Codestral completions API for both.

pub mod chat;
pub mod config;
pub mod connection;
pub mod errors;
pub mod http;
pub mod retry;
pub mod server;
