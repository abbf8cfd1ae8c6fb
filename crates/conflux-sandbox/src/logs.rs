use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sanitize::{sanitize_log_fields, sanitize_log_message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parses a script-supplied level; anything unknown is `info`.
    pub fn parse_lenient(level: &str) -> Self {
        match level {
            "debug" => LogLevel::Debug,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Map<String, Value>>,
}

impl LogEntry {
    /// Sanitizes everything before it is stored.
    pub fn new(level: &str, message: &str, fields: Option<Map<String, Value>>) -> Self {
        Self {
            level: LogLevel::parse_lenient(level),
            message: sanitize_log_message(message),
            fields: fields.map(sanitize_log_fields),
        }
    }
}

/// Bounded, ordered log storage shared between the interpreter thread and the
/// watchdog.
#[derive(Debug)]
pub struct LogBuffer {
    capacity: usize,
    entries: Mutex<Vec<LogEntry>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn is_full(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
            >= self.capacity
    }

    /// Stores `entry` unless the buffer is full. Returns whether it was kept.
    pub fn push(&self, entry: LogEntry) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.capacity {
            return false;
        }
        entries.push(entry);
        true
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("debug", LogLevel::Debug)]
    #[case("info", LogLevel::Info)]
    #[case("warn", LogLevel::Warn)]
    #[case("error", LogLevel::Error)]
    #[case("fatal", LogLevel::Info)]
    #[case("WARN", LogLevel::Info)]
    #[case("", LogLevel::Info)]
    fn levels_parse_leniently(#[case] raw: &str, #[case] expected: LogLevel) {
        assert_eq!(LogLevel::parse_lenient(raw), expected);
    }

    #[test]
    fn buffer_stops_at_capacity() {
        let buffer = LogBuffer::new(2);
        assert!(buffer.push(LogEntry::new("info", "one", None)));
        assert!(buffer.push(LogEntry::new("info", "two", None)));
        assert!(buffer.is_full());
        assert!(!buffer.push(LogEntry::new("info", "three", None)));

        let messages: Vec<String> = buffer.snapshot().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["one".to_string(), "two".to_string()]);
    }
}
