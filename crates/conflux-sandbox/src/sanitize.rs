//! Scrubbing applied to everything that leaves the interpreter.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

pub const MAX_LOG_MESSAGE_CHARS: usize = 10_000;
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

static ANSI_ESCAPE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").ok());

/// Control characters other than tab, newline and carriage return.
fn is_stripped_control(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}')
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Strips terminal escapes and control characters, then caps the length.
pub fn sanitize_log_message(message: &str) -> String {
    let without_ansi = match ANSI_ESCAPE.as_ref() {
        Some(pattern) => pattern.replace_all(message, "").into_owned(),
        None => message.to_string(),
    };
    let cleaned: String = without_ansi
        .chars()
        .filter(|c| !is_stripped_control(*c))
        .collect();
    truncate(&cleaned, MAX_LOG_MESSAGE_CHARS)
}

/// Sanitizes every key and string value, walking nested objects and arrays.
pub fn sanitize_log_fields(fields: Map<String, Value>) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(key, value)| (sanitize_log_message(&key), sanitize_value(value)))
        .collect()
}

fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(sanitize_log_message(&text)),
        Value::Object(map) => Value::Object(sanitize_log_fields(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        other => other,
    }
}

/// Puts an error message on one line and caps it.
pub fn sanitize_error_message(message: &str) -> String {
    let flattened = message
        .replace("\r\n", " ")
        .replace(['\n', '\t'], " ");
    truncate(&flattened, MAX_ERROR_MESSAGE_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn strips_ansi_and_control_characters() {
        let cleaned = sanitize_log_message("\u{1b}[31mred\u{1b}[0m\u{07} bell\ttab\nline");
        assert_eq!(cleaned, "red bell\ttab\nline");
    }

    #[test]
    fn nested_fields_are_sanitized() {
        let fields = json!({
            "ke\u{1b}[1my": "va\u{0}lue",
            "nested": {"inner": "\u{1b}[32mgreen"},
            "list": ["a\u{7f}", {"deep": "b\u{1}"}],
            "count": 3
        });
        let Value::Object(fields) = fields else {
            unreachable!()
        };

        let sanitized = Value::Object(sanitize_log_fields(fields));
        assert_eq!(
            sanitized,
            json!({
                "key": "value",
                "nested": {"inner": "green"},
                "list": ["a", {"deep": "b"}],
                "count": 3
            })
        );
    }

    proptest! {
        #[test]
        fn log_messages_are_bounded(message in ".{0,12000}") {
            let cleaned = sanitize_log_message(&message);
            prop_assert!(cleaned.chars().count() <= MAX_LOG_MESSAGE_CHARS + 3);
            prop_assert!(!cleaned.chars().any(is_stripped_control));
        }

        #[test]
        fn error_messages_are_single_line(message in "(?s).{0,800}") {
            let cleaned = sanitize_error_message(&message);
            prop_assert!(cleaned.chars().count() <= MAX_ERROR_MESSAGE_CHARS + 3);
            prop_assert!(!cleaned.contains('\n'));
            prop_assert!(!cleaned.contains('\t'));
        }
    }
}
