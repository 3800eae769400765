//! Errors returned by the LLM client.
//!
//! Every variant is a value handed back to the caller; none of them is meant
//! to crash the pipeline. Callers fall back to their own heuristics.

use std::fmt;
use std::time::Duration;

/// Flat classification of an [`LlmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Misconfigured,
    RateLimited,
    ServerError,
    ClientError,
    NetworkFailure,
    UnexpectedContentType,
    MalformedStructure,
    NoStructureDetected,
    RetriesExhausted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Misconfigured => "misconfigured",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::ClientError => "client_error",
            ErrorKind::NetworkFailure => "network_failure",
            ErrorKind::UnexpectedContentType => "unexpected_content_type",
            ErrorKind::MalformedStructure => "malformed_structure",
            ErrorKind::NoStructureDetected => "no_structure_detected",
            ErrorKind::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during LLM operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("LLM client not configured: missing {}", .missing.join(", "))]
    Misconfigured { missing: Vec<&'static str> },

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Client error {status}: {body}")]
    ClientError { status: u16, body: String },

    #[error("Network error: {0}")]
    NetworkFailure(String),

    #[error("Unexpected content type {content_type:?}")]
    UnexpectedContentType { content_type: String, raw: String },

    #[error("Malformed structured output: {reason}")]
    MalformedStructure { reason: String, raw: String },

    #[error("No structured value found in response")]
    NoStructureDetected { raw: String },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<LlmError> },
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Misconfigured { .. } => ErrorKind::Misconfigured,
            LlmError::RateLimited { .. } => ErrorKind::RateLimited,
            LlmError::ServerError { .. } => ErrorKind::ServerError,
            LlmError::ClientError { .. } => ErrorKind::ClientError,
            LlmError::NetworkFailure(_) => ErrorKind::NetworkFailure,
            LlmError::UnexpectedContentType { .. } => ErrorKind::UnexpectedContentType,
            LlmError::MalformedStructure { .. } => ErrorKind::MalformedStructure,
            LlmError::NoStructureDetected { .. } => ErrorKind::NoStructureDetected,
            LlmError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::RetriesExhausted { last, .. } => last.is_rate_limit(),
            _ => false,
        }
    }

    /// Whether a fresh attempt could succeed. Only transport failures qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ServerError { .. } => true,
            LlmError::NetworkFailure(_) => true,
            LlmError::Misconfigured { .. } => false,
            LlmError::ClientError { .. } => false,
            LlmError::UnexpectedContentType { .. } => false,
            LlmError::MalformedStructure { .. } => false,
            LlmError::NoStructureDetected { .. } => false,
            LlmError::RetriesExhausted { .. } => false,
        }
    }

    /// Raw response text attached for diagnostics, if any
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            LlmError::UnexpectedContentType { raw, .. }
            | LlmError::MalformedStructure { raw, .. }
            | LlmError::NoStructureDetected { raw } => Some(raw),
            LlmError::ServerError { body, .. } | LlmError::ClientError { body, .. } => Some(body),
            LlmError::RetriesExhausted { last, .. } => last.raw_text(),
            _ => None,
        }
    }
}
