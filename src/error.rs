//! Error types for Triagr
//!
//! Centralized error handling using thiserror. Per-call LLM failures live in
//! [`crate::llm::LlmError`]; this type wraps them alongside startup errors.

use thiserror::Error;

use crate::llm::LlmError;

/// All error types that can occur in Triagr
#[derive(Debug, Error)]
pub enum TriageError {
    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// LLM call failed
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML config parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for Triagr operations
pub type Result<T> = std::result::Result<T, TriageError>;
