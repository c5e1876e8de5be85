/// Shared text helpers for rendered markdown and tool responses

/// Safely truncate a string at a UTF-8 boundary
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if max_bytes >= s.len() { return s; }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Render a list for a history record: placeholder when empty, the bare item
/// when there is one, a `- ` bullet list otherwise.
pub fn format_list(items: &[String], empty_placeholder: &str) -> String {
    match items {
        [] => empty_placeholder.to_string(),
        [only] => only.clone(),
        many => bullet_list(many),
    }
}

/// One `- item` line per entry.
pub fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `text`, or `fallback` when it is blank.
pub fn or_placeholder<'a>(text: &'a str, fallback: &'a str) -> &'a str {
    if text.trim().is_empty() { fallback } else { text }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_truncate_tool_args() {
        let args = r#"{"heartbeatId":"20250101120000"}"#;
        assert_eq!(safe_truncate(args, 14), r#"{"heartbeatId""#);
        assert_eq!(safe_truncate(args, 200), args);
        assert_eq!(safe_truncate("", 0), "");
    }

    #[test]
    fn test_safe_truncate_utf8() {
        // "é" is two bytes; cutting inside it backs off to the boundary
        assert_eq!(safe_truncate("café", 4), "caf");
        assert_eq!(safe_truncate("café", 5), "café");
    }

    #[test]
    fn test_format_list() {
        assert_eq!(format_list(&[], "N/A"), "N/A");
        assert_eq!(format_list(&["one".into()], "N/A"), "one");
        assert_eq!(format_list(&["a".into(), "b".into()], "N/A"), "- a\n- b");
    }

    #[test]
    fn test_or_placeholder() {
        assert_eq!(or_placeholder("  ", "N/A"), "N/A");
        assert_eq!(or_placeholder("reason", "N/A"), "reason");
    }
}
