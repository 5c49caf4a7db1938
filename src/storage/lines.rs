//! Line encoding and corruption recovery
//!
//! A data line is one JSON array terminated by `\n`. Two corruption modes are
//! observed in the wild: a record truncated mid-write, and two records
//! concatenated without a terminator. `decode_line` handles both; callers
//! treat `None` as a skippable line.

use serde_json::Value;

/// Serializes a row into its line form (without the trailing newline).
pub fn encode_row(row: &[Value]) -> String {
    // Serializing a slice of `Value` cannot fail: every key is a string.
    serde_json::to_string(row).unwrap_or_else(|_| "[]".to_string())
}

/// Parses one line into a row.
///
/// Falls back to structure-aware splitting and returns the first complete
/// record when the line holds concatenated or trailing-garbage bytes.
pub fn decode_line(bytes: &[u8]) -> Option<Vec<Value>> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(Value::Array(row)) = serde_json::from_str::<Value>(text) {
        return Some(row);
    }

    let pieces = split_concatenated(text);
    if pieces.len() < 2 && pieces.first().map(|p| p.len()) == Some(text.len()) {
        return None;
    }
    match pieces.first().map(|p| serde_json::from_str::<Value>(p)) {
        Some(Ok(Value::Array(row))) => Some(row),
        _ => None,
    }
}

/// Whether `bytes` hold exactly one parseable record.
pub fn is_parseable(bytes: &[u8]) -> bool {
    let text = String::from_utf8_lossy(bytes);
    matches!(serde_json::from_str::<Value>(text.trim()), Ok(Value::Array(_)))
}

/// Splits text holding several JSON values without separators.
///
/// Tracks string-literal, escape and nesting state per character, so `]`,
/// `}` or `\n` inside string values never cause a split. Bytes after the
/// last balanced value are returned as a final (possibly malformed) piece.
pub fn split_concatenated(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut depth: usize = 0;
    let mut start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if start.is_none() {
            if c.is_whitespace() {
                continue;
            }
            start = Some(i);
        }

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
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(s) = start.take() {
                        pieces.push(&text[s..i + c.len_utf8()]);
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(s) = start {
        let rest = text[s..].trim();
        if !rest.is_empty() {
            pieces.push(rest);
        }
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_plain_line() {
        let row = decode_line(b"[\"a\",1,true]\n").unwrap();
        assert_eq!(row, vec![json!("a"), json!(1), json!(true)]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_line(b"not json at all").is_none());
        assert!(decode_line(b"   \n").is_none());
        assert!(decode_line(b"{\"a\":1}").is_none());
    }

    #[test]
    fn test_decode_recovers_first_of_concatenated_records() {
        let row = decode_line(b"[\"x\",1][\"y\",2]").unwrap();
        assert_eq!(row, vec![json!("x"), json!(1)]);
    }

    #[test]
    fn test_decode_recovers_record_followed_by_garbage() {
        let row = decode_line(b"[\"x\",1][\"y\",").unwrap();
        assert_eq!(row, vec![json!("x"), json!(1)]);
    }

    #[test]
    fn test_split_ignores_delimiters_inside_strings() {
        let text = r#"["a]b","c\"]"]["d"]"#;
        let pieces = split_concatenated(text);
        assert_eq!(pieces, vec![r#"["a]b","c\"]"]"#, r#"["d"]"#]);
    }

    #[test]
    fn test_split_nested_structures() {
        let text = r#"[{"k":[1,2]},3] [4]"#;
        let pieces = split_concatenated(text);
        assert_eq!(pieces, vec![r#"[{"k":[1,2]},3]"#, "[4]"]);
    }

    #[test]
    fn test_split_keeps_incomplete_tail() {
        let pieces = split_concatenated(r#"[1]["unterminated"#);
        assert_eq!(pieces, vec!["[1]", r#"["unterminated"#]);
    }

    #[test]
    fn test_encode_row_is_single_line() {
        let line = encode_row(&[json!("multi\nline"), json!(2)]);
        assert!(!line.contains('\n'));
        assert_eq!(decode_line(line.as_bytes()).unwrap()[0], json!("multi\nline"));
    }
}
