//! Best-effort extraction of a JSON object from model output.

/// Return the first balanced `{...}` span in `text` that parses as JSON, tolerating
/// surrounding prose and code fences. Braces inside string literals are ignored.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(close) = balanced_end(bytes, open) {
            let candidate = &text[open..=close];
            if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                return Some(candidate);
            }
        }
        start = open + 1;
    }
    None
}

/// Index of the `}` closing the object opened at `open`, if any.
fn balanced_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object() {
        assert_eq!(extract_json_object(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn prose_and_code_fence() {
        let text = "Here is the analysis:\n```json\n{\"score\": 82, \"feedback\": \"solid\"}\n```\nThanks!";
        assert_eq!(
            extract_json_object(text),
            Some("{\"score\": 82, \"feedback\": \"solid\"}")
        );
    }

    #[test]
    fn braces_inside_strings() {
        let text = r#"note {"msg": "use {braces} and \"quotes\"", "n": {"x": 1}} trailing }"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"msg": "use {braces} and \"quotes\"", "n": {"x": 1}}"#)
        );
    }

    #[test]
    fn first_object_wins() {
        let text = r#"{"first": true} and {"second": true}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"first": true}"#));
    }

    #[test]
    fn skips_invalid_candidates() {
        let text = r#"{not json} then {"ok": 1}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"ok": 1}"#));
    }

    #[test]
    fn none_when_absent_or_unbalanced() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object(r#"{"a": 1"#), None);
    }
}
