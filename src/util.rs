//! Shared helpers for recovering structured data from model output.

use sha2::{Digest, Sha256};

/// Strip the wrapping models put around JSON: code fences (with or without a
/// `json` tag), stray backticks and escaped backticks, and ASCII/C1 control
/// characters. Inner whitespace is left alone.
pub fn clean_json_response(text: &str) -> String {
    let mut s = text.trim().to_string();
    loop {
        let before = s.len();
        for prefix in ["\\`\\`\\`json", "```json", "``json", "`json", "```", "\\`"] {
            if let Some(rest) = s.strip_prefix(prefix) {
                s = rest.to_string();
            }
        }
        for suffix in ["\\`\\`\\`", "```", "\\`"] {
            if let Some(rest) = s.strip_suffix(suffix) {
                s = rest.to_string();
            }
        }
        s = s.trim_matches(|c: char| c == '`' || c.is_whitespace()).to_string();
        if s.len() == before {
            break;
        }
    }
    s.chars().filter(|c| !c.is_control()).collect()
}

/// Extract a JSON object from text that may contain other content.
/// Uses brace-counting to find the outermost JSON object, ignoring braces
/// inside string literals.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
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
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a model response into `T`, trying the cleaned text first and the
/// outermost embedded object second.
pub fn parse_model_json<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let cleaned = clean_json_response(text);
    if let Ok(value) = serde_json::from_str(&cleaned) {
        return Some(value);
    }
    let object = extract_json_object(&cleaned)?;
    serde_json::from_str(&object).ok()
}

/// Hex-encoded SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Truncate `text` to at most `max` chars for log lines.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_json_response_fenced() {
        let text = "```json\n{\"tasks\": []}\n```";
        assert_eq!(clean_json_response(text), "{\"tasks\": []}");
    }

    #[test]
    fn test_clean_json_response_stray_backticks_and_controls() {
        let text = "`{\"a\":\t1}\r\n`";
        assert_eq!(clean_json_response(text), "{\"a\":1}");
    }

    #[test]
    fn test_clean_json_response_escaped_fence() {
        let text = "\\`\\`\\`json{\"a\": 1}\\`\\`\\`";
        assert_eq!(clean_json_response(text), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_object_with_prefix() {
        let text = r#"Here is the JSON: {"key": "value"} and more"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"key": "value"}"#.to_string())
        );
    }

    #[test]
    fn test_extract_json_object_nested() {
        let text = r#"{"outer": {"inner": "value"}}"#;
        assert_eq!(extract_json_object(text), Some(text.to_string()));
    }

    #[test]
    fn test_extract_json_object_braces_in_strings() {
        let text = r#"x {"body": "void M() { return; }"} y"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"body": "void M() { return; }"}"#.to_string())
        );
    }

    #[test]
    fn test_extract_json_object_unclosed() {
        assert_eq!(extract_json_object(r#"{"key": "value""#), None);
        assert_eq!(extract_json_object("No JSON here"), None);
    }

    #[test]
    fn test_parse_model_json_from_prose() {
        #[derive(serde::Deserialize)]
        struct Probe {
            n: u32,
        }
        let parsed: Probe = parse_model_json("Sure! {\"n\": 7} Hope that helps.").unwrap();
        assert_eq!(parsed.n, 7);
        assert!(parse_model_json::<Probe>("no json").is_none());
    }

    #[test]
    fn test_sha256_hex_is_deterministic() {
        let a = sha256_hex("add a jump button");
        assert_eq!(a, sha256_hex("add a jump button"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, sha256_hex("add a run button"));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo world", 5), "héllo...");
        assert_eq!(preview("short", 10), "short");
    }
}
