//! The hub's own tools, exposed as JSON-in/JSON-out handlers.

use std::collections::{BTreeMap, HashSet};

use conflux_core::{JsonObject, Registry};
use conflux_sandbox::{LogEntry, ScriptEngine};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{HubError, Result};

pub const EXECUTE: &str = "execute";
pub const LIST: &str = "list";
pub const REFRESH_TOOLS: &str = "refreshTools";
pub const INSPECT: &str = "inspect";

pub const MAX_QUERY_CHARS: usize = 1000;
pub const MAX_LIST_RESULTS: usize = 100;
pub const MAX_REFRESH_IDS: usize = 100;

/// What a built-in hands back: a JSON document plus the MCP error flag.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltinResponse {
    pub content: Value,
    pub is_error: bool,
}

impl BuiltinResponse {
    fn ok<T: Serialize>(tool: &'static str, content: &T) -> Result<Self> {
        Ok(Self {
            content: to_value(tool, content)?,
            is_error: false,
        })
    }
}

fn to_value<T: Serialize>(tool: &'static str, content: &T) -> Result<Value> {
    serde_json::to_value(content).map_err(|e| HubError::Encode {
        tool,
        message: e.to_string(),
    })
}

/// `null` arguments are treated as an empty object.
fn parse_args<T: for<'de> Deserialize<'de>>(tool: &'static str, args: Value) -> Result<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| HubError::invalid_arguments(tool, e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ExecuteArgs {
    #[serde(default)]
    code: String,
}

#[derive(Debug, Serialize)]
struct ExecuteResponse {
    result: Value,
    logs: Vec<LogEntry>,
}

pub async fn execute(
    engine: &ScriptEngine,
    args: Value,
    cancel: &CancellationToken,
) -> Result<BuiltinResponse> {
    let args: ExecuteArgs = parse_args(EXECUTE, args)?;
    if args.code.is_empty() {
        return Err(HubError::invalid_arguments(EXECUTE, "code parameter is required"));
    }

    let outcome = engine.execute(cancel, &args.code).await;
    match outcome.error {
        None => BuiltinResponse::ok(
            EXECUTE,
            &ExecuteResponse {
                result: outcome.result,
                logs: outcome.logs,
            },
        ),
        Some(error) => {
            debug!(kind = error.kind.as_str(), "Script finished with an error");
            Ok(BuiltinResponse {
                content: to_value(
                    EXECUTE,
                    &ExecuteResponse {
                        result: json!({ "error": error }),
                        logs: outcome.logs,
                    },
                )?,
                is_error: true,
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    query: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListedTool {
    name: String,
    description: String,
    server: String,
    #[serde(skip_serializing_if = "JsonObject::is_empty")]
    input_schema: JsonObject,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    tools: Vec<ListedTool>,
    total: usize,
}

pub async fn list(registry: &Registry, args: Value) -> Result<BuiltinResponse> {
    let args: ListArgs = parse_args(LIST, args)?;
    let query = args.query.unwrap_or_default();
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(HubError::invalid_arguments(
            LIST,
            format!("query too long (max {MAX_QUERY_CHARS} characters)"),
        ));
    }
    let server_filter = args.server.filter(|server| !server.is_empty());

    let mut tools = Vec::new();
    let mut total = 0;
    for (namespaced, tool) in registry.get_all_tools().await {
        let server = namespaced
            .split_once('.')
            .map_or("unknown", |(server, _)| server)
            .to_string();
        if let Some(filter) = &server_filter
            && !server.eq_ignore_ascii_case(filter)
        {
            continue;
        }
        let description = tool.description.unwrap_or_default();
        if !matches_keywords(&tool.name, &description, &query) {
            continue;
        }

        total += 1;
        if tools.len() < MAX_LIST_RESULTS {
            tools.push(ListedTool {
                name: namespaced,
                description,
                server,
                input_schema: tool.input_schema,
            });
        }
    }

    BuiltinResponse::ok(LIST, &ListResponse { tools, total })
}

/// Comma-separated keywords; a tool matches when any keyword appears in its
/// name or description. No non-empty keyword means no filter.
pub fn matches_keywords(name: &str, description: &str, query: &str) -> bool {
    let keywords: Vec<String> = query
        .split(',')
        .map(|keyword| keyword.trim().to_lowercase())
        .filter(|keyword| !keyword.is_empty())
        .collect();
    if keywords.is_empty() {
        return true;
    }

    let name = name.to_lowercase();
    let description = description.to_lowercase();
    keywords
        .iter()
        .any(|keyword| name.contains(keyword.as_str()) || description.contains(keyword.as_str()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshArgs {
    #[serde(default)]
    server_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    refreshed: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    errors: BTreeMap<String, String>,
}

pub async fn refresh_tools(
    registry: &Registry,
    args: Value,
    cancel: &CancellationToken,
) -> Result<BuiltinResponse> {
    let args: RefreshArgs = parse_args(REFRESH_TOOLS, args)?;
    let requested = args.server_ids.unwrap_or_default();
    if requested.len() > MAX_REFRESH_IDS {
        return Err(HubError::invalid_arguments(
            REFRESH_TOOLS,
            format!("too many serverIds (max {MAX_REFRESH_IDS})"),
        ));
    }

    let server_ids = if requested.is_empty() {
        registry.list_clients().await
    } else {
        let mut seen = HashSet::new();
        requested
            .into_iter()
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect()
    };

    let mut response = RefreshResponse {
        refreshed: Vec::new(),
        errors: BTreeMap::new(),
    };
    for server_id in server_ids {
        if cancel.is_cancelled() {
            return Err(HubError::Cancelled);
        }
        match registry.refresh_tools(&server_id).await {
            Ok(count) => {
                debug!(server_id = %server_id, tools = count, "Refreshed tools");
                response.refreshed.push(server_id);
            }
            Err(e) => {
                warn!(server_id = %server_id, error = %e, "Tool refresh failed");
                response.errors.insert(server_id, "refresh failed".to_string());
            }
        }
    }

    BuiltinResponse::ok(REFRESH_TOOLS, &response)
}

pub async fn inspect(registry: &Registry) -> Result<BuiltinResponse> {
    let servers = registry.statuses().await;
    let collisions = registry.detect_name_collisions().await;
    let tool_count = registry.get_all_tools().await.len();
    BuiltinResponse::ok(
        INSPECT,
        &json!({
            "servers": servers,
            "toolCount": tool_count,
            "collisions": collisions,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("read_file", "Reads a file", "", true)]
    #[case("read_file", "Reads a file", " , ,", true)]
    #[case("read_file", "Reads a file", "READ", true)]
    #[case("read_file", "Reads a file", "write, file", true)]
    #[case("read_file", "Reads a file", "write,delete", false)]
    #[case("search", "Full-text Search over docs", "docs", true)]
    fn keyword_matching(
        #[case] name: &str,
        #[case] description: &str,
        #[case] query: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(matches_keywords(name, description, query), expected);
    }
}
