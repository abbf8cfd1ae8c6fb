use std::sync::Arc;
use std::time::{Duration, Instant};

use conflux::{Hub, HubConfig, HubError};
use conflux_core::test_utils::{FakeBackend, FakeConnector};
use conflux_core::{ToolResponse, ToolSchema};
use rstest::rstest;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn config(servers: Value) -> HubConfig {
    HubConfig::from_json_str(
        &json!({
            "mcpServers": servers,
            "settings": {
                "initialBackoffMs": 10,
                "maxBackoffMs": 40,
                "closeTimeoutMs": 100,
                "executionTimeoutMs": 2000
            }
        })
        .to_string(),
    )
    .unwrap()
}

fn stdio(command: &str) -> Value {
    json!({ "command": command })
}

async fn started_hub(connector: &Arc<FakeConnector>, servers: Value) -> Hub {
    let hub = Hub::new(config(servers), connector.clone()).unwrap();
    hub.start().await.unwrap();
    hub
}

async fn call(hub: &Hub, name: &str, args: Value) -> conflux::BuiltinResponse {
    hub.call_builtin(name, args, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_start_connects_enabled_servers_only() {
    let connector = FakeConnector::new();
    connector.add_backend("fs", FakeBackend::with_tools(["read"]));
    connector.add_backend("off", FakeBackend::with_tools(["noop"]));

    let hub = started_hub(
        &connector,
        json!({
            "fs": stdio("mcp-fs"),
            "off": { "command": "mcp-off", "enable": false }
        }),
    )
    .await;

    assert_eq!(hub.registry().list_clients().await, vec!["fs".to_string()]);
    assert_eq!(connector.connect_count("off"), 0);
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_required_failure_aborts_start_and_unwinds() {
    let connector = FakeConnector::new();
    connector.add_backend("fs", FakeBackend::with_tools(["read"]));
    connector.add_backend(
        "db",
        FakeBackend {
            connect_failures: 1,
            ..FakeBackend::with_tools(["query"])
        },
    );

    let hub = Hub::new(
        config(json!({
            "fs": stdio("mcp-fs"),
            "db": { "command": "mcp-db", "required": true }
        })),
        connector.clone(),
    )
    .unwrap();

    let err = hub.start().await.unwrap_err();
    match err {
        HubError::RequiredServer { server_id, .. } => assert_eq!(server_id, "db"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(hub.registry().is_shutting_down());
    assert!(!connector.latest_session("fs").unwrap().is_running());
}

#[tokio::test]
async fn test_optional_failure_recovers_in_background() {
    let connector = FakeConnector::new();
    connector.add_backend(
        "flaky",
        FakeBackend {
            connect_failures: 1,
            ..FakeBackend::with_tools(["ping"])
        },
    );

    let hub = started_hub(&connector, json!({ "flaky": stdio("mcp-flaky") })).await;

    let deadline = Instant::now() + Duration::from_secs(3);
    while hub.registry().get_client("flaky").await.is_err() {
        assert!(Instant::now() < deadline, "optional server never came up");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        hub.registry().get_tools("flaky").await.unwrap().len(),
        1
    );
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_optional_server_with_bad_config_is_skipped() {
    let connector = FakeConnector::new();
    let hub = started_hub(
        &connector,
        json!({ "weird": { "transport": "carrier-pigeon" } }),
    )
    .await;

    assert!(hub.registry().list_clients().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_returns_result_and_logs() {
    let connector = FakeConnector::new();
    connector.add_backend(
        "fs",
        FakeBackend::with_tools(["read"]).respond("read", ToolResponse::text(r#"{"size": 12}"#)),
    );
    let hub = started_hub(&connector, json!({ "fs": stdio("mcp-fs") })).await;

    let response = call(
        &hub,
        conflux::EXECUTE,
        json!({ "code": "const r = mcp.callTool('fs.read', {}); console.log('size', r.size); r.size * 2" }),
    )
    .await;

    assert!(!response.is_error);
    assert_eq!(
        response.content,
        json!({
            "result": 24,
            "logs": [{ "level": "info", "message": "size 12" }]
        })
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_reports_script_errors_as_data() {
    let connector = FakeConnector::new();
    let hub = started_hub(&connector, json!({})).await;

    let response = call(
        &hub,
        conflux::EXECUTE,
        json!({ "code": "mcp.log('warn', 'about to fail'); null.x" }),
    )
    .await;

    assert!(response.is_error);
    assert_eq!(response.content["result"]["error"]["type"], "runtime_error");
    assert_eq!(response.content["logs"][0]["level"], "warn");
}

#[tokio::test]
async fn test_execute_requires_code() {
    let connector = FakeConnector::new();
    let hub = started_hub(&connector, json!({})).await;

    let err = hub
        .call_builtin(conflux::EXECUTE, json!({}), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::InvalidArguments { .. }));
}

#[tokio::test]
async fn test_list_filters_by_server_and_keywords() {
    let connector = FakeConnector::new();
    connector.add_backend(
        "fs",
        FakeBackend {
            tools: vec![
                ToolSchema::new("read_file").with_description("Read a file from disk"),
                ToolSchema::new("write_file").with_description("Write a file"),
            ],
            ..FakeBackend::default()
        },
    );
    connector.add_backend(
        "web",
        FakeBackend {
            tools: vec![ToolSchema::new("fetch").with_description("Fetch a URL")],
            ..FakeBackend::default()
        },
    );
    let hub = started_hub(
        &connector,
        json!({ "fs": stdio("mcp-fs"), "web": stdio("mcp-web") }),
    )
    .await;

    let everything = call(&hub, conflux::LIST, Value::Null).await;
    assert_eq!(everything.content["total"], 3);

    let by_server = call(&hub, conflux::LIST, json!({ "server": "FS" })).await;
    assert_eq!(by_server.content["total"], 2);

    let by_keyword = call(&hub, conflux::LIST, json!({ "query": "url, disk" })).await;
    let names: Vec<&str> = by_keyword.content["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["fs.read_file", "web.fetch"]);
    assert_eq!(by_keyword.content["tools"][1]["server"], "web");
}

#[tokio::test]
async fn test_list_caps_results_but_counts_all() {
    let connector = FakeConnector::new();
    connector.add_backend(
        "big",
        FakeBackend::with_tools((0..150).map(|i| format!("tool_{i:03}"))),
    );
    let hub = started_hub(&connector, json!({ "big": stdio("mcp-big") })).await;

    let response = call(&hub, conflux::LIST, json!({})).await;
    assert_eq!(response.content["total"], 150);
    assert_eq!(response.content["tools"].as_array().unwrap().len(), 100);
}

#[tokio::test]
async fn test_list_rejects_long_queries() {
    let connector = FakeConnector::new();
    let hub = started_hub(&connector, json!({})).await;

    let err = hub
        .call_builtin(
            conflux::LIST,
            json!({ "query": "x".repeat(1001) }),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("query too long"));
}

#[tokio::test]
async fn test_refresh_reports_generic_failures() {
    let connector = FakeConnector::new();
    connector.add_backend("fs", FakeBackend::with_tools(["read"]));
    let hub = started_hub(&connector, json!({ "fs": stdio("mcp-fs") })).await;
    connector.update_backend("fs", |backend| {
        backend.tools.push(ToolSchema::new("write"));
    });

    let response = call(
        &hub,
        conflux::REFRESH_TOOLS,
        json!({ "serverIds": ["fs", "", "fs", "ghost"] }),
    )
    .await;

    assert_eq!(
        response.content,
        json!({
            "refreshed": ["fs"],
            "errors": { "ghost": "refresh failed" }
        })
    );
    assert_eq!(hub.registry().get_tools("fs").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_refresh_defaults_to_every_server() {
    let connector = FakeConnector::new();
    connector.add_backend("a", FakeBackend::with_tools(["x"]));
    connector.add_backend("b", FakeBackend::with_tools(["y"]));
    let hub = started_hub(&connector, json!({ "a": stdio("a"), "b": stdio("b") })).await;

    let response = call(&hub, conflux::REFRESH_TOOLS, json!({})).await;
    assert_eq!(response.content, json!({ "refreshed": ["a", "b"] }));
}

#[tokio::test]
async fn test_refresh_limits_id_count() {
    let connector = FakeConnector::new();
    let hub = started_hub(&connector, json!({})).await;
    let ids: Vec<String> = (0..101).map(|i| format!("s{i}")).collect();

    let err = hub
        .call_builtin(
            conflux::REFRESH_TOOLS,
            json!({ "serverIds": ids }),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("too many serverIds"));
}

#[tokio::test]
async fn test_inspect_reports_statuses_and_collisions() {
    let connector = FakeConnector::new();
    connector.add_backend("a", FakeBackend::with_tools(["search", "only_a"]));
    connector.add_backend("b", FakeBackend::with_tools(["search"]));
    let hub = started_hub(&connector, json!({ "a": stdio("a"), "b": stdio("b") })).await;

    let response = call(&hub, conflux::INSPECT, Value::Null).await;

    assert_eq!(response.content["toolCount"], 3);
    assert_eq!(response.content["collisions"], json!({ "search": ["a", "b"] }));
    let servers = response.content["servers"].as_array().unwrap();
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0]["id"], "a");
    assert_eq!(servers[0]["connected"], true);
    assert_eq!(servers[0]["toolCount"], 2);
}

#[rstest]
#[case("search")]
#[case("")]
#[tokio::test]
async fn test_unknown_builtin_is_rejected(#[case] name: &str) {
    let connector = FakeConnector::new();
    let hub = started_hub(&connector, json!({})).await;

    let err = hub
        .call_builtin(name, Value::Null, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::UnknownBuiltin(_)));
}
