use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sanitize::sanitize_error_message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "syntax_error")]
    Syntax,
    #[serde(rename = "runtime_error")]
    Runtime,
    #[serde(rename = "validation_error")]
    Validation,
    #[serde(rename = "async_not_allowed")]
    AsyncNotAllowed,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Syntax => "syntax_error",
            ErrorKind::Runtime => "runtime_error",
            ErrorKind::Validation => "validation_error",
            ErrorKind::AsyncNotAllowed => "async_not_allowed",
        }
    }
}

/// A script failure, reported as data rather than as an interpreter exception.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{} - {message}", kind.as_str())]
pub struct RuntimeError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
}

impl RuntimeError {
    /// Builds an error whose message is flattened onto one line and capped.
    pub fn new<M: AsRef<str>>(kind: ErrorKind, message: M) -> Self {
        Self {
            kind,
            message: sanitize_error_message(message.as_ref()),
        }
    }

    pub fn timeout<M: AsRef<str>>(message: M) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn syntax<M: AsRef<str>>(message: M) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn runtime<M: AsRef<str>>(message: M) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn validation<M: AsRef<str>>(message: M) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn async_not_allowed<M: AsRef<str>>(message: M) -> Self {
        Self::new(ErrorKind::AsyncNotAllowed, message)
    }
}
