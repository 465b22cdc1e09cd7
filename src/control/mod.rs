//! Local HTTP control plane.
//!
//! Handlers hold the orchestrator lock only long enough to clone the `Arc`,
//! so a slow backend call never blocks `/status` or `/health`.
//!
//! | Method | Path                   | Body                   |
//! |--------|------------------------|------------------------|
//! | GET    | `/health`              | JSON                   |
//! | GET    | `/status`              | JSON                   |
//! | GET    | `/tabs`                | JSON                   |
//! | GET    | `/logs/{service}`      | text (`?lines=N`)      |
//! | GET    | `/logfile/{service}`   | text (`?run=&lines=`)  |
//! | POST   | `/send/{service}`      | `{"text": ...}`        |
//! | POST   | `/focus/{service}`     |                        |
//! | POST   | `/start/{service}`     |                        |
//! | POST   | `/restart/{service}`   |                        |
//! | POST   | `/restart`             | every live service     |
//! | POST   | `/reload/{service}`    |                        |
//! | POST   | `/reload`              | every live service     |
//! | POST   | `/stop/{service}`      |                        |
//! | POST   | `/stop`                | shuts the orchestrator down |

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::logstore::LogStore;
use crate::orchestrator::Orchestrator;
use crate::{AppError, Result};

/// Name reported by `/status`.
pub const SERVER_NAME: &str = "devtabs";

/// Shared state behind every handler.
#[derive(Debug, Clone)]
pub struct ControlState {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    orchestrator: RwLock<Option<Arc<Orchestrator>>>,
    store: LogStore,
    started: Instant,
    shutdown: CancellationToken,
}

impl ControlState {
    /// State with no orchestrator attached yet.
    ///
    /// `shutdown` is cancelled by `POST /stop`.
    #[must_use]
    pub fn new(store: LogStore, shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Shared {
                orchestrator: RwLock::new(None),
                store,
                started: Instant::now(),
                shutdown,
            }),
        }
    }

    /// Attach the orchestrator once startup has produced one.
    pub async fn set_orchestrator(&self, orchestrator: Arc<Orchestrator>) {
        *self.inner.orchestrator.write().await = Some(orchestrator);
    }

    /// Current orchestrator; the lock is released before returning.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` while no orchestrator is attached.
    pub async fn orchestrator(&self) -> Result<Arc<Orchestrator>> {
        self.inner
            .orchestrator
            .read()
            .await
            .clone()
            .ok_or_else(|| AppError::Backend("orchestrator not ready".into()))
    }

    /// Log store used by the historical log endpoints.
    #[must_use]
    pub fn log_store(&self) -> &LogStore {
        &self.inner.store
    }

    /// Seconds since the state was created.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.inner.started.elapsed().as_secs()
    }

    /// Token cancelled by `POST /stop`.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }
}

/// Build the router.
pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/tabs", get(handlers::tabs))
        .route("/logs/{service}", get(handlers::logs))
        .route("/logfile/{service}", get(handlers::logfile))
        .route("/send/{service}", post(handlers::send))
        .route("/focus/{service}", post(handlers::focus))
        .route("/start/{service}", post(handlers::start))
        .route("/restart/{service}", post(handlers::restart))
        .route("/restart", post(handlers::restart_all))
        .route("/reload/{service}", post(handlers::reload))
        .route("/reload", post(handlers::reload_all))
        .route("/stop/{service}", post(handlers::stop_one))
        .route("/stop", post(handlers::stop_all))
        .with_state(state)
}

/// Serve on `127.0.0.1:port` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Control` if the port cannot be bound or the server
/// fails.
pub async fn serve(state: ControlState, port: u16, ct: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Control(format!("failed to bind control plane on {bind}: {err}")))?;
    serve_listener(state, listener, ct).await
}

/// Serve on an already-bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Control` if the server fails.
pub async fn serve_listener(
    state: ControlState,
    listener: TcpListener,
    ct: CancellationToken,
) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|err| AppError::Control(format!("listener has no address: {err}")))?;
    info!(%addr, "control plane listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Control(format!("control plane error: {err}")))?;

    info!("control plane shut down");
    Ok(())
}
