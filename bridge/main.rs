#![forbid(unsafe_code)]

//! `devtabs-mcp`: MCP tool server bridging an agent's stdio to the control
//! plane.
//!
//! Logs go to stderr; stdout carries only protocol messages.

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use devtabs::bridge::{self, Bridge, ControlClient};
use devtabs::Result;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let client = ControlClient::from_env()?;
    info!(url = %client.base(), "bridge started");

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_ct.cancel();
        }
    });

    bridge::serve_stdio(Bridge::new(client), ct).await
}
