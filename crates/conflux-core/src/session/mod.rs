//! The remote session abstraction.
//!
//! The registry and dispatcher only ever talk to backends through
//! [`RemoteSession`] and [`SessionConnector`]. The production implementation
//! lives in [`mcp_client`] and speaks MCP through `rmcp`; tests substitute an
//! in-memory implementation.

mod env;
mod mcp_client;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::McpTransport;
use crate::error::SessionError;

pub use env::{INHERITED_ENV_VARS, SAFE_PATH, restricted_env};
pub use mcp_client::{RmcpConnector, RmcpSession};

pub type JsonObject = serde_json::Map<String, Value>;

/// A tool as advertised by a backend during discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: JsonObject,
}

impl ToolSchema {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: JsonObject::new(),
        }
    }

    pub fn with_description<D: Into<String>>(mut self, description: D) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentItem {
    Text(String),
    /// A tool's `structuredContent`, passed through as JSON.
    Structured(Value),
    /// Image, audio, resource and anything else that is not plain text.
    NonText(&'static str),
}

/// The payload of a remote tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolResponse {
    pub content: Vec<ContentItem>,
    pub is_error: bool,
}

impl ToolResponse {
    pub fn text<T: Into<String>>(text: T) -> Self {
        Self {
            content: vec![ContentItem::Text(text.into())],
            is_error: false,
        }
    }

    pub fn error<T: Into<String>>(text: T) -> Self {
        Self {
            content: vec![ContentItem::Text(text.into())],
            is_error: true,
        }
    }

    /// All text content joined by newlines, used when the backend flags an error.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text(text) => Some(text.clone()),
                ContentItem::Structured(value) => Some(value.to_string()),
                ContentItem::NonText(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A live session with one backend.
#[async_trait]
pub trait RemoteSession: Send + Sync + fmt::Debug {
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, SessionError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<ToolResponse, SessionError>;

    async fn close(&self) -> Result<(), SessionError>;

    /// Resolves once the session is gone. `Ok` means it was closed through
    /// [`RemoteSession::close`]; an error carries the reason it died.
    async fn wait_for_termination(&self) -> Result<(), SessionError>;
}

#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        server_id: &str,
        transport: &McpTransport,
    ) -> Result<Arc<dyn RemoteSession>, SessionError>;
}
