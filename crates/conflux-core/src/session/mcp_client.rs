//! MCP sessions backed by the rmcp client.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{
    RoleClient, ServiceExt,
    model::{CallToolRequestParam, CallToolResult, RawContent, Tool},
    service::{Peer, RunningService},
};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ContentItem, JsonObject, RemoteSession, SessionConnector, ToolResponse, ToolSchema};
use crate::config::McpTransport;
use crate::error::SessionError;

/// Opens rmcp client sessions over child processes, TCP streams or
/// streamable HTTP.
#[derive(Debug, Clone, Copy, Default)]
pub struct RmcpConnector;

#[async_trait]
impl SessionConnector for RmcpConnector {
    async fn connect(
        &self,
        server_id: &str,
        transport: &McpTransport,
    ) -> Result<Arc<dyn RemoteSession>, SessionError> {
        let service = match transport {
            McpTransport::Stdio { command, args, env } => {
                info!(
                    server_id = %server_id,
                    command = %command,
                    args = ?args,
                    "Spawning MCP server process"
                );
                let process = TokioChildProcess::new(Command::new(command).configure(|cmd| {
                    cmd.args(args);
                    cmd.env_clear();
                    cmd.envs(env);
                    cmd.kill_on_drop(true);
                }))
                .map_err(|e| {
                    SessionError::Transport(format!("Failed to create MCP process: {e}"))
                })?;
                ().serve(process).await.map_err(serve_error)?
            }
            McpTransport::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|e| SessionError::Transport(format!("Failed to open TCP stream: {e}")))?;
                ().serve(stream).await.map_err(serve_error)?
            }
            McpTransport::Http { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.clone());
                ().serve(transport).await.map_err(serve_error)?
            }
        };

        debug!(
            server_id = %server_id,
            peer_info = ?service.peer_info(),
            "MCP session established"
        );

        Ok(Arc::new(RmcpSession::new(server_id.to_string(), service)))
    }
}

fn serve_error(e: impl std::fmt::Display) -> SessionError {
    SessionError::Transport(format!("Failed to serve MCP: {e}"))
}

/// A running rmcp client.
///
/// The `RunningService` is owned by a driver task so that termination can be
/// observed by any number of waiters while requests go through a cloned
/// [`Peer`].
#[derive(Debug)]
pub struct RmcpSession {
    server_id: String,
    peer: Peer<RoleClient>,
    close: CancellationToken,
    terminated: watch::Receiver<Option<String>>,
}

impl RmcpSession {
    fn new(server_id: String, service: RunningService<RoleClient, ()>) -> Self {
        let peer = service.peer().clone();
        let close = CancellationToken::new();
        let (terminated_tx, terminated) = watch::channel(None);

        let shutdown = service.cancellation_token();
        let close_requested = close.clone();
        let driver_server_id = server_id.clone();
        tokio::spawn(async move {
            let waiting = service.waiting();
            tokio::pin!(waiting);

            let outcome = tokio::select! {
                outcome = &mut waiting => outcome,
                () = close_requested.cancelled() => {
                    shutdown.cancel();
                    waiting.await
                }
            };

            let reason = match outcome {
                Ok(reason) => format!("{reason:?}"),
                Err(e) => format!("service task failed: {e}"),
            };
            debug!(server_id = %driver_server_id, reason = %reason, "MCP session ended");
            let _ = terminated_tx.send(Some(reason));
        });

        Self {
            server_id,
            peer,
            close,
            terminated,
        }
    }

    fn request_error(&self, e: impl std::fmt::Display) -> SessionError {
        SessionError::Request(format!("{}: {e}", self.server_id))
    }
}

impl Drop for RmcpSession {
    fn drop(&mut self) {
        self.close.cancel();
    }
}

fn tool_schema(tool: Tool) -> ToolSchema {
    ToolSchema {
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()),
        input_schema: (*tool.input_schema).clone(),
    }
}

/// Unstructured content wins; `structuredContent` is only used when a tool
/// returns nothing else.
fn tool_response(result: CallToolResult) -> ToolResponse {
    let mut content: Vec<ContentItem> = result
        .content
        .unwrap_or_default()
        .into_iter()
        .map(|content| content_item(content.raw))
        .collect();
    if content.is_empty() {
        content.extend(result.structured_content.map(ContentItem::Structured));
    }

    ToolResponse {
        content,
        is_error: result.is_error.unwrap_or(false),
    }
}

fn content_item(raw: RawContent) -> ContentItem {
    match raw {
        RawContent::Text(text) => ContentItem::Text(text.text),
        RawContent::Image(_) => ContentItem::NonText("image"),
        RawContent::Audio(_) => ContentItem::NonText("audio"),
        _ => ContentItem::NonText("resource"),
    }
}

#[async_trait]
impl RemoteSession for RmcpSession {
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, SessionError> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .map_err(|e| self.request_error(e))?;
        Ok(tools.into_iter().map(tool_schema).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<ToolResponse, SessionError> {
        let result = self
            .peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| self.request_error(e))?;

        Ok(tool_response(result))
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.close.cancel();
        match self.wait_for_termination().await {
            Ok(()) | Err(SessionError::Terminated(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn wait_for_termination(&self) -> Result<(), SessionError> {
        let mut terminated = self.terminated.clone();
        let reason = match terminated.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => "driver task dropped".to_string(),
        };

        if self.close.is_cancelled() {
            Ok(())
        } else {
            Err(SessionError::Terminated(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;
    use serde_json::json;

    #[test]
    fn text_content_is_converted_in_order() {
        let response = tool_response(CallToolResult::success(vec![
            Content::text("first"),
            Content::text("second"),
        ]));

        assert_eq!(
            response.content,
            vec![
                ContentItem::Text("first".to_string()),
                ContentItem::Text("second".to_string()),
            ]
        );
        assert!(!response.is_error);
    }

    #[test]
    fn structured_only_results_are_kept() {
        let response = tool_response(CallToolResult::structured(json!({ "temperature": 22.5 })));

        assert_eq!(
            response.content,
            vec![ContentItem::Structured(json!({ "temperature": 22.5 }))]
        );
    }

    #[test]
    fn text_content_takes_precedence_over_structured() {
        let mut result = CallToolResult::success(vec![Content::text("plain")]);
        result.structured_content = Some(json!({ "ignored": true }));

        let response = tool_response(result);
        assert_eq!(response.content, vec![ContentItem::Text("plain".to_string())]);
    }

    #[test]
    fn missing_content_is_empty() {
        let response = tool_response(CallToolResult {
            content: None,
            structured_content: None,
            is_error: Some(true),
        });

        assert!(response.content.is_empty());
        assert!(response.is_error);
    }
}
