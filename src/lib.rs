//! Triagr - rate-governed LLM access for a task triage pipeline
//!
//! Every pipeline stage shares one [`LlmClient`], which keeps outbound calls
//! under a per-minute quota and a concurrency ceiling, adapts its spacing to
//! server pushback, and turns free-form model output into JSON objects.

pub mod config;
pub mod error;
pub mod llm;
pub mod scheduler;

pub use config::{ClientConfig, Config};
pub use error::{Result, TriageError};
pub use llm::{LlmClient, LlmError, ParsedResult};
