/// Truncates to at most `max_chars` characters, appending an ellipsis when
/// anything was cut. Operates on char boundaries.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{}...", truncated)
}

/// Extracts the first balanced JSON object from free-form text. The model
/// provider wraps JSON in prose or markdown fences; this scans from the
/// first '{' tracking brace depth, skipping braces inside string literals
/// and escape sequences.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
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
                    return Some(&text[start..=i]);
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
    fn truncate_leaves_short_strings_alone() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn truncate_cuts_and_marks() {
        assert_eq!(truncate_chars("hello world", 5), "hello...");
    }

    #[test]
    fn extracts_plain_object() {
        let text = r#"{"a": 1}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn extracts_object_from_prose() {
        let text = "Sure! Here is the JSON:\n```json\n{\"score\": 8.5}\n```\nHope that helps.";
        assert_eq!(extract_json_object(text), Some(r#"{"score": 8.5}"#));
    }

    #[test]
    fn handles_nested_and_string_braces() {
        let text = r#"prefix {"outer": {"inner": "has } brace"}, "b": 2} suffix"#;
        let obj = extract_json_object(text).unwrap();
        assert_eq!(obj, r#"{"outer": {"inner": "has } brace"}, "b": 2}"#);
        assert!(serde_json::from_str::<serde_json::Value>(obj).is_ok());
    }

    #[test]
    fn handles_escaped_quotes() {
        let text = r#"{"msg": "she said \"hi\" {not a brace}"}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn no_object_means_none() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{unclosed"), None);
    }
}
