//! JSON extraction from LLM responses.
//!
//! Models wrap JSON in code fences, prefix it with reasoning, or get cut off
//! mid-object. The helpers here find the payload in that noise.
//!
//! # Strategies, in order
//!
//! 1. A fenced code block (```json or bare ```)
//! 2. The whole response, when it starts with `{` or `[`
//! 3. The first balanced object or array anywhere in the text
//!
//! ```
//! use reply_forge::utils::json_extraction::extract_json;
//!
//! let response = "Sure! Here you go: {\"post_id\": \"42\"}";
//! assert_eq!(extract_json(response).unwrap(), "{\"post_id\": \"42\"}");
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Error type for JSON extraction failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed} unclosed delimiters. Partial: {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed: usize,
    },

    #[error("No JSON content found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },

    #[error("Extracted JSON does not match the expected shape: {0}")]
    Invalid(String),
}

fn preview(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn code_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"```(?:[A-Za-z]+)?\s*\n?([\s\S]*?)\n?```").expect("code fence pattern is valid")
    })
}

/// Scans a string starting with `{` or `[` and returns the index of the
/// delimiter closing it, skipping string literals and escapes.
pub fn find_matching_close(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Number of delimiters left open at the end of `s`.
fn unclosed_delimiters(s: &str) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth
}

/// Returns the balanced value starting at `s[0]` if it parses as JSON.
fn balanced_value(s: &str) -> Option<&str> {
    let end = find_matching_close(s)?;
    let candidate = &s[..=end];
    serde_json::from_str::<serde_json::Value>(candidate)
        .ok()
        .map(|_| candidate)
}

/// Extracts the JSON payload from an LLM response.
pub fn extract_json(content: &str) -> Result<String, JsonExtractionError> {
    let trimmed = content.trim();

    if let Some(block) = code_fence()
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
    {
        if let Some(start) = block.find(['{', '[']) {
            if let Some(json) = balanced_value(&block[start..]) {
                return Ok(json.to_string());
            }
        }
    }

    let mut first_open = None;
    for (start, _) in trimmed.match_indices(['{', '[']) {
        first_open.get_or_insert(start);
        if let Some(json) = balanced_value(&trimmed[start..]) {
            return Ok(json.to_string());
        }
    }

    match first_open {
        Some(start) => {
            let partial = &trimmed[start..];
            Err(JsonExtractionError::Truncated {
                partial_preview: preview(partial, 100),
                unclosed: unclosed_delimiters(partial).max(1),
            })
        }
        None => Err(JsonExtractionError::NotFound {
            content_preview: preview(trimmed, 50),
        }),
    }
}

/// Extracts and deserializes the JSON payload of an LLM response.
pub fn parse_json<T: DeserializeOwned>(content: &str) -> Result<T, JsonExtractionError> {
    let json = extract_json(content)?;
    serde_json::from_str(&json).map_err(|e| JsonExtractionError::Invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_direct_object_and_array() {
        assert_eq!(extract_json(r#"{"a": 1}"#).unwrap(), r#"{"a": 1}"#);
        assert_eq!(extract_json("  [1, 2, 3]  ").unwrap(), "[1, 2, 3]");
    }

    #[test]
    fn test_code_fences() {
        let response = "Thinking...\n```json\n{\"a\": [1, 2]}\n```\nDone.";
        assert_eq!(extract_json(response).unwrap(), r#"{"a": [1, 2]}"#);

        let response = "```\n[{\"post_id\": \"1\"}]\n```";
        assert_eq!(extract_json(response).unwrap(), r#"[{"post_id": "1"}]"#);
    }

    #[test]
    fn test_embedded_in_prose() {
        let response = r#"I picked these: {"selections": [{"post_id": "7", "reason": "fun {x}"}]} hope it helps"#;
        let json = extract_json(response).unwrap();
        assert!(json.starts_with("{\"selections\""));
        assert!(json.ends_with("]}"));
    }

    #[test]
    fn test_skips_unparseable_brackets() {
        let response = r#"Options [a, b] then {"ok": true}"#;
        assert_eq!(extract_json(response).unwrap(), r#"{"ok": true}"#);
    }

    #[test]
    fn test_truncated_and_missing() {
        let err = extract_json(r#"{"a": [1, 2"#).unwrap_err();
        assert!(matches!(err, JsonExtractionError::Truncated { unclosed: 2, .. }));

        let err = extract_json("no json here").unwrap_err();
        assert!(matches!(err, JsonExtractionError::NotFound { ref content_preview } if content_preview == "no json here"));
    }

    #[test]
    fn test_find_matching_close_handles_strings() {
        let s = r#"{"a": "}", "b": "\"{"}"#;
        assert_eq!(find_matching_close(s), Some(s.len() - 1));
        assert_eq!(find_matching_close("{"), None);
    }

    #[test]
    fn test_parse_json_shape_mismatch() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Shape {
            post_id: String,
        }

        let parsed: Shape = parse_json(r#"{"post_id": "1"}"#).unwrap();
        assert_eq!(parsed.post_id, "1");

        let err = parse_json::<Shape>(r#"{"other": 1}"#).unwrap_err();
        assert!(matches!(err, JsonExtractionError::Invalid(_)));
    }
}
