//! Agent bridge: an MCP tool server over stdio.
//!
//! Translates a fixed tool vocabulary into control-plane HTTP requests. The
//! bridge keeps no session state, so restarting it is always safe. Framing,
//! the `initialize` handshake and JSON-RPC error envelopes are handled by
//! `rmcp`; this module only answers `tools/list` and `tools/call`.

pub mod client;
pub mod tools;

use std::future::Future;

use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam,
    ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer, ServiceExt};
use rmcp::transport::io::stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{AppError, Result};

pub use client::ControlClient;

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "devtabs";

/// Stateless tool server forwarding every call to the control plane.
#[derive(Debug, Clone)]
pub struct Bridge {
    client: ControlClient,
}

impl Bridge {
    /// Bridge forwarding to `client`.
    #[must_use]
    pub fn new(client: ControlClient) -> Self {
        Self { client }
    }

    /// Control-plane client used for tool calls.
    #[must_use]
    pub fn client(&self) -> &ControlClient {
        &self.client
    }
}

impl ServerHandler for Bridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Implementation::default()
            },
            instructions: Some(
                "Inspect and drive local dev services: list tabs, send input, read live or historical logs."
                    .into(),
            ),
            ..ServerInfo::default()
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = std::result::Result<CallToolResult, rmcp::ErrorData>> + Send + '_ {
        let span = info_span!("call_tool", tool = %request.name);
        async move {
            let args = request.arguments.unwrap_or_default();
            let outcome = match tools::call(&self.client, &request.name, &args).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(%err, "tool call failed");
                    tools::ToolOutcome::from_error(err)
                }
            };
            debug!(is_error = outcome.is_error, "tool call finished");
            Ok(outcome.into_result())
        }
        .instrument(span)
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = std::result::Result<ListToolsResult, rmcp::ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(tools::catalog())))
    }
}

/// Serve `bridge` over an arbitrary byte channel until the peer disconnects
/// or `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Rpc` if the handshake fails or the service task dies.
pub async fn serve<R, W>(bridge: Bridge, reader: R, writer: W, ct: CancellationToken) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let service = bridge
        .serve_with_ct((reader, writer), ct)
        .await
        .map_err(|err| AppError::Rpc(format!("bridge handshake failed: {err}")))?;

    let reason = service
        .waiting()
        .await
        .map_err(|err| AppError::Rpc(format!("bridge service error: {err}")))?;

    debug!(?reason, "bridge input closed");
    Ok(())
}

/// Serve `bridge` over stdin/stdout until the agent disconnects or `ct` is
/// cancelled.
///
/// # Errors
///
/// Returns `AppError::Rpc` if the transport fails to initialize.
pub async fn serve_stdio(bridge: Bridge, ct: CancellationToken) -> Result<()> {
    info!(url = %bridge.client().base(), "starting stdio bridge");
    let (stdin, stdout) = stdio();
    serve(bridge, stdin, stdout, ct).await?;
    info!("stdio bridge shut down");
    Ok(())
}
