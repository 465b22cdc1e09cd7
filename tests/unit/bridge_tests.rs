//! MCP tool server behaviour without a live control plane.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use devtabs::bridge::client::UNAVAILABLE;
use devtabs::bridge::tools::{self, ToolOutcome, TOOL_NAMES};
use devtabs::bridge::{self, Bridge, ControlClient, SERVER_NAME};

/// Nothing listens on port 1, so every forwarded call is refused.
fn offline_client() -> ControlClient {
    ControlClient::new("http://127.0.0.1:1").expect("client")
}

/// Client end of an in-memory MCP session with a running bridge.
struct Session {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    task: JoinHandle<devtabs::Result<()>>,
    next_id: u64,
}

impl Session {
    async fn open(bridge: Bridge) -> (Self, Value) {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_side);
        let task = tokio::spawn(bridge::serve(
            bridge,
            server_read,
            server_write,
            CancellationToken::new(),
        ));
        let (client_read, writer) = tokio::io::split(client_side);
        let mut session = Self {
            lines: BufReader::new(client_read).lines(),
            writer,
            task,
            next_id: 0,
        };

        let init = session
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": { "name": "devtabs-tests", "version": "0.0.0" }
                }),
            )
            .await;
        session
            .write(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        (session, init)
    }

    async fn write(&mut self, message: &Value) {
        self.writer
            .write_all(format!("{message}\n").as_bytes())
            .await
            .expect("write");
        self.writer.flush().await.expect("flush");
    }

    async fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id;
        self.write(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        loop {
            let line = tokio::time::timeout(Duration::from_secs(10), self.lines.next_line())
                .await
                .expect("response in time")
                .expect("read")
                .expect("bridge closed early");
            let message: Value = serde_json::from_str(&line).expect("json line");
            if message["id"] == id {
                return message;
            }
        }
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Value {
        let response = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await;
        assert!(response.get("error").is_none(), "protocol error: {response}");
        response["result"].clone()
    }

    async fn close(mut self) {
        self.writer.shutdown().await.expect("close");
        self.task.await.expect("join").expect("serve");
    }
}

fn text(result: &Value) -> &str {
    result["content"][0]["text"].as_str().expect("text content")
}

#[tokio::test]
async fn initialize_reports_protocol_and_tools_capability() {
    let (session, init) = Session::open(Bridge::new(offline_client())).await;

    assert_eq!(init["id"], 1);
    assert_eq!(init["result"]["protocolVersion"], "2024-11-05");
    assert!(init["result"]["capabilities"]["tools"].is_object());
    assert_eq!(init["result"]["serverInfo"]["name"], SERVER_NAME);

    session.close().await;
}

#[tokio::test]
async fn tools_list_matches_catalog_order() {
    let (mut session, _) = Session::open(Bridge::new(offline_client())).await;

    let response = session.request("tools/list", json!({})).await;
    let listed = response["result"]["tools"].as_array().expect("tools array");
    let names: Vec<&str> = listed
        .iter()
        .map(|tool| tool["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, TOOL_NAMES);
    assert!(listed
        .iter()
        .all(|tool| tool["inputSchema"]["type"] == "object"));

    session.close().await;
}

#[tokio::test]
async fn unknown_tool_is_a_tool_error_not_a_protocol_error() {
    let (mut session, _) = Session::open(Bridge::new(offline_client())).await;

    let result = session.call_tool("deploy", json!({})).await;
    assert_eq!(result["isError"], true);
    assert!(text(&result).contains("unknown tool"));

    session.close().await;
}

#[tokio::test]
async fn missing_required_argument_is_reported_before_any_request() {
    let (mut session, _) = Session::open(Bridge::new(offline_client())).await;

    let result = session.call_tool("send", json!({"tab": "1"})).await;
    assert_eq!(result["isError"], true);
    assert!(text(&result).contains("'text'"), "unexpected: {}", text(&result));

    session.close().await;
}

#[tokio::test]
async fn unreachable_control_plane_yields_availability_message() {
    let (mut session, _) = Session::open(Bridge::new(offline_client())).await;

    let result = session.call_tool("status", json!({})).await;
    assert_eq!(result["isError"], true);
    assert_eq!(text(&result), UNAVAILABLE);

    session.close().await;
}

#[tokio::test]
async fn cancelling_the_token_ends_the_session() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_side);
    let ct = CancellationToken::new();
    let task = tokio::spawn(bridge::serve(
        Bridge::new(offline_client()),
        server_read,
        server_write,
        ct.clone(),
    ));

    let (client_read, mut client_write) = tokio::io::split(client_side);
    let init = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {
        "protocolVersion": "2024-11-05",
        "capabilities": {},
        "clientInfo": { "name": "devtabs-tests", "version": "0.0.0" }
    }});
    client_write
        .write_all(format!("{init}\n").as_bytes())
        .await
        .expect("write");
    let mut lines = BufReader::new(client_read).lines();
    lines.next_line().await.expect("read").expect("initialize answer");
    let initialized = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
    client_write
        .write_all(format!("{initialized}\n").as_bytes())
        .await
        .expect("write");

    ct.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("serve returns after cancel")
        .expect("join")
        .expect("serve");
}

#[tokio::test]
async fn tool_calls_map_to_outcomes_without_a_session() {
    let client = offline_client();

    let outcome = tools::call(&client, "deploy", &Map::new()).await.expect("outcome");
    assert!(outcome.is_error);
    assert!(outcome.text.contains("unknown tool"));

    let mut args = Map::new();
    args.insert("tab".into(), json!(2));
    let outcome = tools::call(&client, "logs", &args).await;
    assert!(matches!(outcome, Err(devtabs::AppError::Control(_))));
}

#[test]
fn outcomes_become_call_results() {
    let ok = ToolOutcome {
        text: "fine".into(),
        is_error: false,
    };
    let value = serde_json::to_value(ok.into_result()).expect("serialize");
    assert_eq!(value["content"][0]["text"], "fine");
    assert_ne!(value["isError"], true);

    let failed = ToolOutcome::from_error(devtabs::AppError::Control(UNAVAILABLE.into()));
    assert_eq!(failed.text, UNAVAILABLE);
    let value = serde_json::to_value(failed.into_result()).expect("serialize");
    assert_eq!(value["isError"], true);
}

#[test]
fn catalog_follows_tool_names() {
    let catalog = tools::catalog();
    let names: Vec<&str> = catalog.iter().map(|tool| &*tool.name).collect();
    assert_eq!(names, TOOL_NAMES);

    let send = &catalog[1];
    assert_eq!(send.input_schema.get("required"), Some(&json!(["tab", "text"])));
}

#[test]
fn urls_percent_encode_references() {
    let client = ControlClient::new("http://127.0.0.1:9876").expect("client");
    let url = client.url(&["send", "flutter ios"], &[("lines", "20".to_owned())]);
    assert_eq!(url.as_str(), "http://127.0.0.1:9876/send/flutter%20ios?lines=20");

    let nested = client.url(&["logs", "a/b"], &[]);
    assert_eq!(nested.path(), "/logs/a%2Fb");
}

#[test]
fn invalid_base_url_is_a_config_error() {
    let err = ControlClient::new("not a url").expect_err("invalid");
    assert!(matches!(err, devtabs::AppError::Config(_)));
}
