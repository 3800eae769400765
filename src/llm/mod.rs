//! LLM client layer
//!
//! This module provides:
//! - Request and outcome types for chat-completion calls
//! - The `Transport` seam with an HTTP and a scripted implementation
//! - Response shape detection and structured-output extraction
//! - `LlmClient`, the rate-governed retrying executor

pub mod client;
pub mod error;
pub mod extract;
pub mod response;
pub mod transport;
pub mod types;

pub use client::{CallAttempt, LlmClient, PLACEHOLDER_RESPONSE};
pub use error::{ErrorKind, LlmError};
pub use extract::{extract_structured, find_balanced_object, repair_json};
pub use response::{ResponsePayload, ResponseShape, is_html, parse_response};
pub use transport::{HttpTransport, MockTransport, Transport, classify_response, parse_retry_after};
pub use types::{ChatRequest, Message, ParsedResult, Role, TransportOutcome, Usage};
