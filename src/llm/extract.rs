//! Structured-value extraction from free-form model output
//!
//! Models wrap JSON in prose, code fences, or trailing chatter, and often
//! emit JSON that is almost valid. This module finds the first complete
//! `{...}` object in the text, parses it strictly, and falls back to a
//! best-effort repair before giving up.

use serde_json::{Map, Value};

use crate::llm::error::LlmError;
use crate::llm::types::ParsedResult;

/// Locate the first balanced top-level object in `text`.
///
/// Braces inside double-quoted strings (after the opening `{`) are ignored.
/// Returns None when there is no `{` or it is never closed.
pub fn find_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + c.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract the first JSON object from `text`.
///
/// Failures carry the full original text for logging.
pub fn extract_structured(text: &str) -> ParsedResult<Map<String, Value>> {
    let Some(candidate) = find_balanced_object(text) else {
        return Err(LlmError::NoStructureDetected { raw: text.to_string() });
    };

    let strict_err = match serde_json::from_str::<Map<String, Value>>(candidate) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let repaired = repair_json(candidate);
    match serde_json::from_str::<Map<String, Value>>(&repaired) {
        Ok(value) => {
            tracing::debug!(error = %strict_err, "Recovered structured output via repair pass");
            Ok(value)
        }
        Err(_) => Err(LlmError::MalformedStructure {
            reason: strict_err.to_string(),
            raw: text.to_string(),
        }),
    }
}

/// Best-effort rewrite of near-JSON into JSON.
///
/// Handles trailing commas, unquoted keys, single-quoted strings, raw
/// newlines inside strings, Python `True`/`False`/`None`, missing closers,
/// and stray closers. Anything else passes through untouched.
pub fn repair_json(candidate: &str) -> String {
    let chars: Vec<char> = candidate.chars().collect();
    let mut out = String::with_capacity(candidate.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                i = copy_string(&chars, i, &mut out);
                continue;
            }
            '{' => {
                closers.push('}');
                out.push(c);
            }
            '[' => {
                closers.push(']');
                out.push(c);
            }
            '}' | ']' => {
                // a closer with no matching opener is dropped
                if closers.contains(&c) {
                    while let Some(expected) = closers.pop() {
                        strip_trailing_comma(&mut out);
                        out.push(expected);
                        if expected == c {
                            break;
                        }
                    }
                }
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                while i < chars.len() && is_number_char(chars[i]) {
                    out.push(chars[i]);
                    i += 1;
                }
                continue;
            }
            c if is_word_start(c) => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let is_key = chars[i..].iter().find(|c| !c.is_whitespace()) == Some(&':');
                push_word(&word, is_key, &mut out);
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }

    while let Some(expected) = closers.pop() {
        strip_trailing_comma(&mut out);
        out.push(expected);
    }
    out
}

/// Copy a quoted string starting at `start`, normalized to double quotes.
/// Returns the index just past the closing quote.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push('"');
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() => {
                let next = chars[i + 1];
                // \' is not a JSON escape
                if next == '\'' {
                    out.push('\'');
                } else {
                    out.push('\\');
                    out.push(next);
                }
                i += 2;
                continue;
            }
            c if c == quote => {
                out.push('"');
                return i + 1;
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
        i += 1;
    }

    // unterminated string
    out.push('"');
    chars.len()
}

fn push_word(word: &str, is_key: bool, out: &mut String) {
    if is_key {
        out.push('"');
        out.push_str(word);
        out.push('"');
        return;
    }
    match word {
        "True" => out.push_str("true"),
        "False" => out.push_str("false"),
        "None" | "NULL" | "Null" | "undefined" => out.push_str("null"),
        other => out.push_str(other),
    }
}

fn strip_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
}

fn is_word_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::error::ErrorKind;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_prefix_and_suffix_ignored() {
        let result = extract_structured("prefix {\"a\":1,\"b\":[1,2,3]} suffix").unwrap();
        assert_eq!(result, obj(json!({"a": 1, "b": [1, 2, 3]})));
    }

    #[test]
    fn test_trailing_comma_repaired() {
        let result = extract_structured("{\"a\": 1,}").unwrap();
        assert_eq!(result, obj(json!({"a": 1})));
    }

    #[test]
    fn test_no_braces() {
        let err = extract_structured("This is just plain text with no JSON").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoStructureDetected);
        assert_eq!(err.raw_text(), Some("This is just plain text with no JSON"));
    }

    #[test]
    fn test_unclosed_object_is_no_structure() {
        let err = extract_structured("Here you go: {\"a\": 1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoStructureDetected);
    }

    #[test]
    fn test_nested_returns_outer_object() {
        let text = r#"Response: {"data": {"nested": "value", "array": [1, 2, 3]}}"#;
        let result = extract_structured(text).unwrap();
        assert_eq!(result, obj(json!({"data": {"nested": "value", "array": [1, 2, 3]}})));
    }

    #[test]
    fn test_first_of_multiple_objects() {
        let result = extract_structured(r#"First: {"a": 1} Second: {"b": 2}"#).unwrap();
        assert_eq!(result, obj(json!({"a": 1})));
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = r#"ok {"template": "use {name} here", "close": "}"} done"#;
        let result = extract_structured(text).unwrap();
        assert_eq!(result["template"], "use {name} here");
        assert_eq!(result["close"], "}");
    }

    #[test]
    fn test_code_fence() {
        let text = "```json\n{\"priority\": \"high\", \"score\": 8.5}\n```";
        let result = extract_structured(text).unwrap();
        assert_eq!(result, obj(json!({"priority": "high", "score": 8.5})));
    }

    #[test]
    fn test_unquoted_keys_repaired() {
        let result = extract_structured("{priority: \"high\", score: 3, tags: [\"a\",]}").unwrap();
        assert_eq!(result, obj(json!({"priority": "high", "score": 3, "tags": ["a"]})));
    }

    #[test]
    fn test_single_quotes_and_python_literals() {
        let result = extract_structured("{'done': True, 'owner': None, 'note': 'it\\'s \"fine\"'}").unwrap();
        assert_eq!(result, obj(json!({"done": true, "owner": null, "note": "it's \"fine\""})));
    }

    #[test]
    fn test_missing_bracket_repaired() {
        let result = extract_structured(r#"{"tags": ["a", "b"}"#).unwrap();
        assert_eq!(result, obj(json!({"tags": ["a", "b"]})));
    }

    #[test]
    fn test_stray_closer_dropped() {
        let result = extract_structured(r#"{"a": 1]}"#).unwrap();
        assert_eq!(result, obj(json!({"a": 1})));
    }

    #[test]
    fn test_raw_newline_in_string_repaired() {
        let result = extract_structured("{\"summary\": \"line one\nline two\"}").unwrap();
        assert_eq!(result["summary"], "line one\nline two");
    }

    #[test]
    fn test_negative_and_exponent_numbers_survive_repair() {
        let result = extract_structured("{delta: -2.5e-3, count: 10,}").unwrap();
        assert_eq!(result, obj(json!({"delta": -2.5e-3, "count": 10})));
    }

    #[test]
    fn test_unrepairable_is_malformed() {
        let text = r#"Result: {"invalid": json}"#;
        let err = extract_structured(text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedStructure);
        assert_eq!(err.raw_text(), Some(text));
    }

    #[test]
    fn test_serialized_value_extracts_to_itself() {
        let samples = vec![
            json!({}),
            json!({"title": "Fix login", "priority": 3, "tags": ["auth", "bug"]}),
            json!({"nested": {"deep": {"x": [1, {"y": null}]}}, "flag": false}),
            json!({"braces": "{not} a {structure}", "quote": "say \"hi\""}),
        ];
        for sample in samples {
            let text = serde_json::to_string(&sample).unwrap();
            assert_eq!(extract_structured(&text).unwrap(), obj(sample.clone()));

            let pretty = serde_json::to_string_pretty(&sample).unwrap();
            assert_eq!(extract_structured(&pretty).unwrap(), obj(sample));
        }
    }

    #[test]
    fn test_find_balanced_object() {
        assert_eq!(find_balanced_object("a {b} c"), Some("{b}"));
        assert_eq!(find_balanced_object("a {b {c}} d {e}"), Some("{b {c}}"));
        assert_eq!(find_balanced_object("no braces"), None);
        assert_eq!(find_balanced_object("{ never closed"), None);
        assert_eq!(find_balanced_object("émoji ✓ {\"k\": \"ü\"}"), Some("{\"k\": \"ü\"}"));
    }

    #[test]
    fn test_repair_json_output() {
        assert_eq!(repair_json("{a: 1,}"), r#"{"a": 1}"#);
        assert_eq!(repair_json("{\"a\": [1, 2"), r#"{"a": [1, 2]}"#);
    }
}
