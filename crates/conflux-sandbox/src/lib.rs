// Sandboxed script execution for the Conflux hub

mod bridge;
mod engine;
mod error;
mod harden;
mod host;
mod logs;
mod sanitize;
mod validate;

pub use bridge::{ExecutionBridge, HostBridge};
pub use engine::{EngineConfig, ScriptEngine, ScriptOutcome};
pub use error::{ErrorKind, RuntimeError};
pub use logs::{LogEntry, LogLevel};
pub use sanitize::{MAX_ERROR_MESSAGE_CHARS, MAX_LOG_MESSAGE_CHARS};
pub use validate::validate_script;
