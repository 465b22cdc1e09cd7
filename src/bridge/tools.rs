//! Tool catalog and the HTTP request each tool maps to.

use std::sync::Arc;

use reqwest::Method;
use rmcp::model::{CallToolResult, Content, Tool};
use serde_json::{json, Map, Value};

use super::client::ControlClient;
use crate::{AppError, Result};

/// Tool names in catalog order.
pub const TOOL_NAMES: &[&str] = &["status", "send", "logs", "focus", "start_one", "logfile"];

fn schema(value: Value) -> Arc<Map<String, Value>> {
    match value {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(Map::default()),
    }
}

fn tab_property() -> Value {
    json!({ "type": "string", "description": "1-based tab index or part of the service name" })
}

/// Tools answered to `tools/list`, in [`TOOL_NAMES`] order.
#[must_use]
pub fn catalog() -> Vec<Tool> {
    vec![
        Tool::new(
            "status",
            "List running service tabs with their index, name, pane id, and log path.",
            schema(json!({ "type": "object", "properties": {} })),
        ),
        Tool::new(
            "send",
            "Send text followed by Enter to a service tab.",
            schema(json!({
                "type": "object",
                "properties": {
                    "tab": tab_property(),
                    "text": { "type": "string", "description": "Text to send, e.g. r to hot reload" }
                },
                "required": ["tab", "text"]
            })),
        ),
        Tool::new(
            "logs",
            "Read recent live output from a service tab.",
            schema(json!({
                "type": "object",
                "properties": {
                    "tab": tab_property(),
                    "lines": { "type": ["integer", "string"], "description": "Lines to read (default 50, max 1000)" }
                },
                "required": ["tab"]
            })),
        ),
        Tool::new(
            "focus",
            "Bring a service tab to the foreground.",
            schema(json!({
                "type": "object",
                "properties": { "tab": tab_property() },
                "required": ["tab"]
            })),
        ),
        Tool::new(
            "start_one",
            "Start a single configured service in a new tab.",
            schema(json!({
                "type": "object",
                "properties": {
                    "service": { "type": "string", "description": "Service name from the config" }
                },
                "required": ["service"]
            })),
        ),
        Tool::new(
            "logfile",
            "Read a service's log history from disk. service=list summarises all services; run=list lists runs.",
            schema(json!({
                "type": "object",
                "properties": {
                    "service": { "type": "string", "description": "Service name, or list" },
                    "run": { "type": "string", "description": "latest (default), list, or a run timestamp" },
                    "lines": { "type": ["integer", "string"], "description": "Lines to read (default 100)" }
                },
                "required": ["service"]
            })),
        ),
    ]
}

/// Text and error flag of a finished tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    /// Result text shown to the agent.
    pub text: String,
    /// Whether the call failed.
    pub is_error: bool,
}

impl ToolOutcome {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    /// Error outcome for a call that never got an HTTP answer.
    #[must_use]
    pub fn from_error(err: AppError) -> Self {
        match err {
            AppError::Control(msg) => Self::error(msg),
            other => Self::error(other.to_string()),
        }
    }

    /// `tools/call` result carrying the text as a single content block.
    #[must_use]
    pub fn into_result(self) -> CallToolResult {
        let content = vec![Content::text(self.text)];
        if self.is_error {
            CallToolResult::error(content)
        } else {
            CallToolResult::success(content)
        }
    }
}

fn string_arg(args: &Map<String, Value>, key: &str) -> Option<String> {
    match args.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `lines` may arrive as a number or a numeric string.
fn lines_arg(args: &Map<String, Value>) -> Option<String> {
    match args.get("lines")? {
        Value::Number(n) => n.as_u64().map(|n| n.to_string()),
        Value::String(s) => s.trim().parse::<u64>().ok().map(|n| n.to_string()),
        _ => None,
    }
}

/// Run `name` with `args` as exactly one control-plane request.
///
/// # Errors
///
/// Returns `AppError::Control` when the control plane is unreachable.
pub async fn call(client: &ControlClient, name: &str, args: &Map<String, Value>) -> Result<ToolOutcome> {
    let require = |key: &str| {
        string_arg(args, key).ok_or_else(|| format!("missing required argument '{key}'"))
    };

    let (method, url, body) = match name {
        "status" => (Method::GET, client.url(&["tabs"], &[]), None),
        "send" => {
            let (tab, text) = match (require("tab"), require("text")) {
                (Ok(tab), Ok(text)) => (tab, text),
                (Err(msg), _) | (_, Err(msg)) => return Ok(ToolOutcome::error(msg)),
            };
            (
                Method::POST,
                client.url(&["send", &tab], &[]),
                Some(json!({ "text": text })),
            )
        }
        "logs" => {
            let tab = match require("tab") {
                Ok(tab) => tab,
                Err(msg) => return Ok(ToolOutcome::error(msg)),
            };
            let query: Vec<(&str, String)> = lines_arg(args).map(|n| ("lines", n)).into_iter().collect();
            (Method::GET, client.url(&["logs", &tab], &query), None)
        }
        "focus" => {
            let tab = match require("tab") {
                Ok(tab) => tab,
                Err(msg) => return Ok(ToolOutcome::error(msg)),
            };
            (Method::POST, client.url(&["focus", &tab], &[]), None)
        }
        "start_one" => {
            let service = match require("service") {
                Ok(service) => service,
                Err(msg) => return Ok(ToolOutcome::error(msg)),
            };
            (Method::POST, client.url(&["start", &service], &[]), None)
        }
        "logfile" => {
            let service = match require("service") {
                Ok(service) => service,
                Err(msg) => return Ok(ToolOutcome::error(msg)),
            };
            let mut query = Vec::new();
            if let Some(run) = string_arg(args, "run") {
                query.push(("run", run));
            }
            if let Some(lines) = lines_arg(args) {
                query.push(("lines", lines));
            }
            (Method::GET, client.url(&["logfile", &service], &query), None)
        }
        other => return Ok(ToolOutcome::error(format!("unknown tool: {other}"))),
    };

    let response = client.request(method, url, body.as_ref()).await?;
    Ok(if response.ok {
        ToolOutcome::ok(response.body)
    } else {
        ToolOutcome::error(response.body)
    })
}
