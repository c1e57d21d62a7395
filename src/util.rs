//! Shared utility functions for the waypoint crate.

use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

/// Find the first embedded JSON object that deserializes into `T`.
///
/// Agent output often carries prose (which may contain stray braces) around
/// the JSON payload, so every `{` is tried as a candidate start.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    text.char_indices()
        .filter(|(_, ch)| *ch == '{')
        .filter_map(|(start, _)| balanced_object_at(text, start))
        .find_map(|candidate| serde_json::from_str::<T>(&candidate).ok())
}

/// The brace-balanced object starting at `start`, ignoring braces inside
/// string literals.
fn balanced_object_at(text: &str, start: usize) -> Option<String> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Hex-encoded SHA-256 of a document.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Truncate a string to at most `max_len` bytes on a char boundary, with ellipsis.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let cut = s.floor_char_boundary(max_len.saturating_sub(3));
    format!("{}...", &s[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_object_simple() {
        let text = r#"{"key": "value"}"#;
        assert_eq!(balanced_object_at(text, 0), Some(text.to_string()));
    }

    #[test]
    fn test_balanced_object_stops_at_its_closing_brace() {
        let text = r#"Here is the JSON: {"key": "value"} and some more text"#;
        let start = text.find('{').unwrap();
        assert_eq!(
            balanced_object_at(text, start),
            Some(r#"{"key": "value"}"#.to_string())
        );
    }

    #[test]
    fn test_balanced_object_nested() {
        let text = r#"{"outer": {"inner": "value"}}"#;
        assert_eq!(balanced_object_at(text, 0), Some(text.to_string()));
        assert_eq!(
            balanced_object_at(text, 10),
            Some(r#"{"inner": "value"}"#.to_string())
        );
    }

    #[test]
    fn test_balanced_object_ignores_braces_in_strings() {
        let text = r#"{"cmd": "echo }{", "ok": true} trailing"#;
        assert_eq!(
            balanced_object_at(text, 0),
            Some(r#"{"cmd": "echo }{", "ok": true}"#.to_string())
        );
    }

    #[test]
    fn test_balanced_object_unclosed() {
        assert_eq!(balanced_object_at(r#"{"key": "value""#, 0), None);
    }

    #[test]
    fn test_extract_json_without_any_object() {
        assert!(extract_json::<serde_json::Value>("No JSON here").is_none());
    }

    #[test]
    fn test_extract_json_skips_prose_braces() {
        #[derive(serde::Deserialize)]
        struct Payload {
            passed: bool,
        }
        let text = "Checked {every} file.\n```json\n{\"passed\": true}\n```";
        let payload: Payload = extract_json(text).expect("payload");
        assert!(payload.passed);
    }

    #[test]
    fn test_extract_json_returns_none_when_shape_never_matches() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Payload {
            passed: bool,
        }
        assert!(extract_json::<Payload>(r#"{"other": 1}"#).is_none());
    }

    #[test]
    fn test_content_hash_is_stable_hex() {
        let a = content_hash("# Requirements");
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, content_hash("# Requirements"));
        assert_ne!(a, content_hash("# Requirements v2"));
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("cargo test --release", 10), "cargo t...");
    }
}
