//! Response parsing for chat-completion endpoints
//!
//! A body is classified once into a [`ResponseShape`], and the text payload
//! is read from that shape. HTML bodies (proxy error pages, login walls)
//! are rejected up front and never reach the structured extractor.

use serde_json::Value;

use crate::llm::error::LlmError;
use crate::llm::extract::extract_structured;
use crate::llm::types::{ParsedResult, Usage};

/// Text payload read from a successful response
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsePayload {
    pub text: String,
    pub usage: Option<Usage>,
}

/// Recognized response layouts
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
    /// `{"choices": [{"message": {"content": ...}}], "usage": {...}}`
    ChatCompletion { content: String, usage: Option<Usage> },
    /// `{"response": "..."}` from the older `/generate` endpoint
    Legacy { response: String },
    /// Any other JSON document
    Document(Value),
}

impl ResponseShape {
    /// Classify a parsed JSON document
    pub fn detect(document: Value) -> Self {
        if let Some(content) = chat_content(&document) {
            let usage = document.get("usage").map(parse_usage);
            return ResponseShape::ChatCompletion { content, usage };
        }
        if let Some(response) = document.get("response").and_then(Value::as_str)
            && document.get("choices").is_none()
        {
            return ResponseShape::Legacy {
                response: response.to_string(),
            };
        }
        ResponseShape::Document(document)
    }

    pub fn into_payload(self) -> ResponsePayload {
        match self {
            ResponseShape::ChatCompletion { content, usage } => ResponsePayload { text: content, usage },
            ResponseShape::Legacy { response } => ResponsePayload {
                text: response,
                usage: None,
            },
            ResponseShape::Document(document) => ResponsePayload {
                text: document.to_string(),
                usage: None,
            },
        }
    }
}

/// Whether the declared content type or the body itself is an HTML page
pub fn is_html(content_type: Option<&str>, body: &str) -> bool {
    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        if ct.contains("text/html") || ct.contains("application/xhtml") {
            return true;
        }
    }
    let head: String = body.trim_start().chars().take(15).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

/// Turn a raw success body into its text payload.
pub fn parse_response(body: &str, content_type: Option<&str>) -> ParsedResult<ResponsePayload> {
    if is_html(content_type, body) {
        return Err(LlmError::UnexpectedContentType {
            content_type: content_type.unwrap_or("text/html").to_string(),
            raw: body.to_string(),
        });
    }

    match serde_json::from_str::<Value>(body) {
        Ok(document) => Ok(ResponseShape::detect(document).into_payload()),
        Err(_) => extract_structured(body).map(|recovered| ResponsePayload {
            text: Value::Object(recovered).to_string(),
            usage: None,
        }),
    }
}

fn chat_content(document: &Value) -> Option<String> {
    let message = document.get("choices")?.as_array()?.first()?.get("message")?;
    match message.get("content")? {
        Value::String(text) => Some(text.clone()),
        // no text, e.g. a tool-call or refusal turn
        Value::Null => Some(String::new()),
        // content-part arrays: [{"type": "text", "text": "..."}]
        Value::Array(parts) => {
            let text: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            Some(text.join(""))
        }
        _ => None,
    }
}

fn parse_usage(usage: &Value) -> Usage {
    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| usage.get(*name).and_then(Value::as_u64))
            .unwrap_or(0)
    };
    Usage::new(
        field(&["prompt_tokens", "input_tokens"]),
        field(&["completion_tokens", "output_tokens"]),
    )
}
