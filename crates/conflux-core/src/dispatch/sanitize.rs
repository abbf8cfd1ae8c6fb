//! Scrubbing of backend error text before it reaches a script.

use once_cell::sync::Lazy;
use regex::Regex;

pub const MAX_TOOL_ERROR_CHARS: usize = 100;

const TRUNCATION_MARKER: &str = "...";

static PATH_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"(?:/Users/|/home/|/var/|/tmp/|/etc/|/opt/|[A-Za-z]:\\)[^\s'"`,;)\]}]*"#).ok()
});

static HOST_PORT_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}:\d{1,5}\b").ok());

/// Known failure classes, matched on the lowercased text.
const CLASSIFICATIONS: &[(&[&str], &str)] = &[
    (&["not found", "no such tool", "unknown tool"], "tool not found"),
    (&["connection refused"], "server connection refused"),
    (&["timeout", "timed out", "deadline exceeded"], "request timeout"),
    (&["context canceled", "cancelled", "canceled"], "request canceled"),
    (&["invalid argument", "invalid params"], "invalid arguments"),
    (&["permission denied", "access denied"], "permission denied"),
];

/// Maps a backend error to generic text that leaks neither host paths nor
/// network addresses.
pub fn sanitize_tool_error(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    for (needles, generic) in CLASSIFICATIONS {
        if needles.iter().any(|needle| lowered.contains(needle)) {
            return (*generic).to_string();
        }
    }

    let mut redacted = raw.to_string();
    if let Some(pattern) = PATH_PATTERN.as_ref() {
        redacted = pattern.replace_all(&redacted, "[path]").into_owned();
    }
    if let Some(pattern) = HOST_PORT_PATTERN.as_ref() {
        redacted = pattern.replace_all(&redacted, "[host]").into_owned();
    }
    truncate_chars(&redacted, MAX_TOOL_ERROR_CHARS)
}

/// Truncates to at most `max` characters, appending `...` when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("Tool 'frobnicate' not found", "tool not found")]
    #[case("dial tcp: Connection refused", "server connection refused")]
    #[case("request timed out after 60s", "request timeout")]
    #[case("context canceled", "request canceled")]
    #[case("Invalid argument: path must be absolute", "invalid arguments")]
    #[case("open /etc/shadow: permission denied", "permission denied")]
    fn known_failures_map_to_generic_text(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize_tool_error(raw), expected);
    }

    #[test]
    fn redacts_paths_and_addresses() {
        let sanitized = sanitize_tool_error("failed reading /home/alice/.ssh/id_rsa via 10.0.0.12:8443");
        assert_eq!(sanitized, "failed reading [path] via [host]");
    }

    #[test]
    fn redacts_windows_paths() {
        let sanitized = sanitize_tool_error(r"bad file C:\Users\bob\secrets.txt");
        assert_eq!(sanitized, "bad file [path]");
    }

    #[test]
    fn long_messages_are_truncated() {
        let sanitized = sanitize_tool_error(&"x".repeat(250));
        assert_eq!(sanitized.chars().count(), MAX_TOOL_ERROR_CHARS + 3);
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(150);
        let truncated = truncate_chars(&text, 100);
        assert_eq!(truncated.chars().count(), 103);
    }

    proptest! {
        #[test]
        fn output_is_bounded_and_clean(raw in ".{0,400}") {
            let sanitized = sanitize_tool_error(&raw);
            prop_assert!(sanitized.chars().count() <= MAX_TOOL_ERROR_CHARS + 3);
            prop_assert!(!sanitized.contains("/home/"));
            prop_assert!(!sanitized.contains("/Users/"));
        }
    }
}
