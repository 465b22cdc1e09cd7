#![forbid(unsafe_code)]

//! `devtabs`: start every configured service and serve the control plane.
//!
//! `devtabs start-one <service>` adds a single service to a running session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Method;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use devtabs::backend::{ProcessBackend, SessionBackend, WeztermBackend};
use devtabs::bridge::client::ControlClient;
use devtabs::config::BackendChoice;
use devtabs::control::{self, ControlState};
use devtabs::logstore::LogStore;
use devtabs::orchestrator::{spawn_crash_scan, Orchestrator};
use devtabs::roster::PaneRoster;
use devtabs::supervisor::SupervisorOptions;
use devtabs::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "devtabs", about = "Local multi-service orchestrator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "devtabs.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start one configured service in the running session.
    StartOne {
        /// Service name from the config.
        service: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!(
        config = %args.config.display(),
        services = config.services.len(),
        "configuration loaded"
    );

    let store = LogStore::new(config.log_root.clone());
    let backend = build_backend(config.backend, &store);
    let roster = PaneRoster::new(config.roster_path.clone());
    let port = config.api.port;
    let scan_delay = Duration::from_secs(config.crash_scan_delay_seconds);
    let orchestrator = Arc::new(Orchestrator::new(config, backend, store.clone(), roster));

    match args.command {
        Some(Command::StartOne { service }) => start_one(&orchestrator, port, &service).await,
        None => run_session(orchestrator, store, port, scan_delay).await,
    }
}

fn build_backend(choice: BackendChoice, store: &LogStore) -> Arc<dyn SessionBackend> {
    match choice {
        BackendChoice::Wezterm => Arc::new(WeztermBackend::new(store.clone())),
        BackendChoice::Process => {
            Arc::new(ProcessBackend::new(store.clone(), SupervisorOptions::default()))
        }
    }
}

/// Prefer the running control plane; fall back to attaching to the
/// multiplexer window directly.
async fn start_one(orchestrator: &Orchestrator, port: u16, service: &str) -> Result<()> {
    let client = ControlClient::new(&format!("http://127.0.0.1:{port}"))?;
    match client
        .request(Method::POST, client.url(&["start", service], &[]), None)
        .await
    {
        Ok(response) if response.ok => {
            info!(service, "started via control plane");
            return Ok(());
        }
        Ok(response) => return Err(AppError::Control(response.body)),
        Err(err) => warn!(%err, "control plane unreachable, attaching directly"),
    }

    if orchestrator.config().backend == BackendChoice::Process {
        return Err(AppError::Unsupported(
            "start-one needs a running orchestrator when backend = \"process\"".into(),
        ));
    }
    let handle = orchestrator.start_one(service).await?;
    info!(service, pane_id = %handle.handle_id, "service started");
    Ok(())
}

async fn run_session(
    orchestrator: Arc<Orchestrator>,
    store: LogStore,
    port: u16,
    scan_delay: Duration,
) -> Result<()> {
    let ct = CancellationToken::new();
    let state = ControlState::new(store.clone(), ct.clone());

    // ── Control plane ───────────────────────────────────
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|err| AppError::Control(format!("failed to bind control plane on port {port}: {err}")))?;
    let server_ct = ct.clone();
    let server_state = state.clone();
    let server = tokio::spawn(async move {
        if let Err(err) = control::serve_listener(server_state, listener, server_ct).await {
            error!(%err, "control plane failed");
        }
    });

    // ── Startup ─────────────────────────────────────────
    let report = match orchestrator.start_all().await {
        Ok(report) => report,
        Err(err) => {
            error!(%err, "startup aborted");
            ct.cancel();
            if let Err(join_err) = server.await {
                warn!(err = %join_err, "control plane task panicked");
            }
            return Err(err);
        }
    };
    for (service, reason) in &report.failed {
        error!(service, reason, "service did not start");
    }
    info!(
        started = report.started.len(),
        failed = report.failed.len(),
        port,
        "services started"
    );
    state.set_orchestrator(Arc::clone(&orchestrator)).await;

    let scan = spawn_crash_scan(
        store,
        orchestrator.config().service_names(),
        scan_delay,
        ct.child_token(),
    );

    // ── Wait for shutdown ───────────────────────────────
    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        () = ct.cancelled() => info!("shutdown requested"),
    }
    ct.cancel();

    orchestrator.shutdown().await;
    let (server, scan) = tokio::join!(server, scan);
    if let Err(err) = server {
        warn!(%err, "control plane task panicked");
    }
    match scan {
        Ok(failed) if !failed.is_empty() => warn!(?failed, "services crashed during startup"),
        Ok(_) => {}
        Err(err) => warn!(%err, "crash scan task panicked"),
    }
    info!("devtabs shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                if let Err(err) = ctrl_c.await {
                    warn!(%err, "ctrl-c handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
