//! Routing of `serverId.toolName` calls to live sessions.

mod sanitize;


use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::registry::Registry;
use crate::session::ContentItem;

pub use sanitize::{MAX_TOOL_ERROR_CHARS, sanitize_tool_error, truncate_chars};

/// The seam the script engine calls tools through.
#[async_trait]
pub trait ToolCaller: Send + Sync {
    async fn call_tool(
        &self,
        name: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, DispatchError>;
}

/// Server id → tool names a caller may use.
pub type AllowList = HashMap<String, HashSet<String>>;

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    pub call_timeout: Duration,
    /// `None` allows every tool of every server.
    pub allowed_tools: Option<AllowList>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            allowed_tools: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Registry,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(registry: Registry, config: DispatcherConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn call(
        &self,
        name: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, DispatchError> {
        let (server_id, tool_name) = split_tool_name(name)?;
        let arguments = match params {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(other) => {
                return Err(DispatchError::validation(format!(
                    "params must be an object, got {}",
                    json_type_name(&other)
                )));
            }
        };

        if !self.is_allowed(server_id, tool_name) {
            return Err(DispatchError::Unauthorized(name.to_string()));
        }

        let session = self
            .registry
            .get_client(server_id)
            .await
            .map_err(|_| DispatchError::ServerUnavailable(server_id.to_string()))?;

        debug!(server_id = %server_id, tool = %tool_name, "Dispatching tool call");

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(DispatchError::Cancelled(name.to_string())),
            outcome = tokio::time::timeout(self.config.call_timeout, session.call_tool(tool_name, arguments)) => {
                match outcome {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        warn!(server_id = %server_id, tool = %tool_name, error = %e, "Tool call failed");
                        return Err(DispatchError::tool_failed(name, sanitize_tool_error(&e.to_string())));
                    }
                    Err(_) => {
                        warn!(server_id = %server_id, tool = %tool_name, "Tool call timed out");
                        return Err(DispatchError::tool_failed(name, "request timeout"));
                    }
                }
            }
        };

        if response.is_error {
            return Err(DispatchError::tool_failed(
                name,
                sanitize_tool_error(&response.joined_text()),
            ));
        }

        match response.content.into_iter().next() {
            None => Ok(Value::Null),
            Some(ContentItem::Text(text)) => {
                Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
            }
            Some(ContentItem::Structured(value)) => Ok(value),
            Some(ContentItem::NonText(kind)) => {
                debug!(server_id = %server_id, tool = %tool_name, kind, "Unsupported content");
                Err(DispatchError::UnsupportedContent(name.to_string()))
            }
        }
    }

    fn is_allowed(&self, server_id: &str, tool_name: &str) -> bool {
        match &self.config.allowed_tools {
            None => true,
            Some(allowed) => allowed
                .get(server_id)
                .is_some_and(|tools| tools.contains(tool_name)),
        }
    }
}

#[async_trait]
impl ToolCaller for Dispatcher {
    async fn call_tool(
        &self,
        name: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, DispatchError> {
        self.call(name, params, cancel).await
    }
}

/// Splits `serverId.toolName` on the first dot.
pub fn split_tool_name(name: &str) -> Result<(&str, &str), DispatchError> {
    match name.split_once('.') {
        Some((server, tool)) if !server.is_empty() && !tool.is_empty() => Ok((server, tool)),
        _ => Err(DispatchError::validation(format!(
            "invalid tool name '{name}': expected format 'serverID.toolName'"
        ))),
    }
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("github.search_issues", ("github", "search_issues"))]
    #[case("fs.read.file", ("fs", "read.file"))]
    fn splits_on_first_dot(#[case] name: &str, #[case] expected: (&str, &str)) {
        assert_eq!(split_tool_name(name).unwrap(), expected);
    }

    #[rstest]
    #[case("nodot")]
    #[case(".tool")]
    #[case("server.")]
    #[case("")]
    fn rejects_malformed_names(#[case] name: &str) {
        let err = split_tool_name(name).unwrap_err();
        assert!(err.to_string().contains("serverID.toolName"), "{err}");
    }
}
