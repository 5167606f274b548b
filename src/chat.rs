//! Chat request client
//!
//! Turns a user-supplied string into one call to the chat endpoint, folding
//! every failure mode into the error taxonomy.

mod client;
mod types;

pub use client::{validate_message, ChatClient};
pub use types::{completion_content, ChatMessage, ChatReply, ChatRequest, Role};
