//! Agent bridge driving a live control plane over an MCP session.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use devtabs::bridge::{self, Bridge, ControlClient};
use devtabs::control::{serve_listener, ControlState};
use devtabs::logstore::LogStore;
use devtabs::orchestrator::Orchestrator;

use super::test_helpers::{process_config, process_orchestrator, ECHO_LOOP};

struct Live {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    session: JoinHandle<devtabs::Result<()>>,
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
    next_id: u64,
    _dir: tempfile::TempDir,
}

async fn live_bridge() -> Live {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = process_config(dir.path(), &[("flutter-ios", ECHO_LOOP), ("api", ECHO_LOOP)], "");
    let (orchestrator, _backend) = process_orchestrator(config);
    orchestrator.start_all().await.expect("start");

    let shutdown = CancellationToken::new();
    let state = ControlState::new(LogStore::new(dir.path().join("logs")), shutdown.clone());
    state.set_orchestrator(Arc::clone(&orchestrator)).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(serve_listener(state, listener, shutdown.clone()));

    let client = ControlClient::new(&format!("http://{addr}")).expect("client");
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_side);
    let session = tokio::spawn(bridge::serve(
        Bridge::new(client),
        server_read,
        server_write,
        shutdown.child_token(),
    ));
    let (client_read, writer) = tokio::io::split(client_side);

    let mut live = Live {
        lines: BufReader::new(client_read).lines(),
        writer,
        session,
        orchestrator,
        shutdown,
        next_id: 0,
        _dir: dir,
    };
    let init = live
        .request(
            "initialize",
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "devtabs-tests", "version": "0.0.0" }
            }),
        )
        .await;
    assert_eq!(init["result"]["serverInfo"]["name"], "devtabs");
    live.write(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;
    live
}

impl Live {
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

    async fn call(&mut self, name: &str, arguments: Value) -> Value {
        let response = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await;
        assert!(response.get("error").is_none(), "protocol error: {response}");
        response["result"].clone()
    }

    async fn finish(mut self) {
        self.writer.shutdown().await.expect("close");
        self.session.await.expect("join").expect("serve");
        self.orchestrator.shutdown().await;
        self.shutdown.cancel();
    }
}

fn text(result: &Value) -> &str {
    result["content"][0]["text"].as_str().expect("text content")
}

#[tokio::test]
async fn status_tool_lists_tabs() {
    let mut live = live_bridge().await;

    let result = live.call("status", json!({})).await;
    assert_eq!(result["isError"], false);
    let tabs: Value = serde_json::from_str(text(&result)).expect("tabs json");
    assert_eq!(tabs["tabs"][0]["name"], "flutter-ios");
    assert_eq!(tabs["tabs"][1]["index"], 2);

    live.finish().await;
}

#[tokio::test]
async fn send_and_logs_tools_round_trip_through_http() {
    let mut live = live_bridge().await;

    let result = live.call("send", json!({"tab": "flutter", "text": "r"})).await;
    assert_eq!(result["isError"], false, "send failed: {}", text(&result));

    let mut echoed = false;
    for _ in 0..100 {
        let result = live.call("logs", json!({"tab": "1", "lines": "20"})).await;
        if text(&result).contains("got r") {
            echoed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(echoed);

    live.finish().await;
}

#[tokio::test]
async fn http_errors_surface_as_tool_errors() {
    let mut live = live_bridge().await;

    let result = live.call("focus", json!({"tab": "db"})).await;
    assert_eq!(result["isError"], true);
    assert!(text(&result).contains("flutter-ios"));

    let result = live.call("start_one", json!({"service": "api"})).await;
    assert_eq!(result["isError"], true);

    let result = live
        .call("logfile", json!({"service": "api", "run": "list"}))
        .await;
    assert_eq!(result["isError"], false);

    live.finish().await;
}

#[tokio::test]
async fn logfile_tool_cannot_leave_the_log_root() {
    let mut live = live_bridge().await;

    let result = live
        .call("logfile", json!({"service": "../outside", "run": "secret"}))
        .await;
    assert_eq!(result["isError"], true);
    assert!(text(&result).contains("no logs"));

    live.finish().await;
}
