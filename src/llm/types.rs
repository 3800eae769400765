//! Wire and outcome types for chat-completion calls
//!
//! This module defines the request body, token usage, and the per-attempt
//! transport classification consumed by the retry loop.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::llm::error::LlmError;

/// Outcome of a parse step: `Ok` carries the text or value, `Err` the
/// failure kind plus any raw text kept for diagnostics.
pub type ParsedResult<T = String> = std::result::Result<T, LlmError>;

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Body of a `POST /chat/completions` request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    /// Single-turn request for one prompt
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::user(prompt)],
            max_tokens,
            temperature,
        }
    }

    /// The user prompt, if the request carries one
    pub fn prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Token usage reported by the API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    /// Create new usage stats
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Calculate total tokens
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Accumulate usage from another instance
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Classification of a single network attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransportOutcome {
    /// 2xx with the raw body and declared content type
    Success { body: String, content_type: Option<String> },
    /// 429, with the server's Retry-After hint when present
    RateLimited { retry_after: Option<Duration> },
    /// 5xx
    ServerError { status: u16, body: String },
    /// Any other non-success status
    ClientError { status: u16, body: String },
    /// Connection, timeout, or body read failure
    NetworkFailure(String),
}

impl TransportOutcome {
    /// Convenience constructor for a JSON success
    pub fn json(body: impl Into<String>) -> Self {
        Self::Success {
            body: body.into(),
            content_type: Some("application/json".to_string()),
        }
    }
}
