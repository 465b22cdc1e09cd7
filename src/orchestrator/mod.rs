//! Startup sequence and per-service lifecycle commands.
//!
//! The [`Orchestrator`] ties the gate, backend, registry, roster and log
//! store together. Every command that addresses a running service resolves
//! its reference against a fresh backend listing first.

pub mod crash_scan;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};

use crate::backend::SessionBackend;
use crate::config::GlobalConfig;
use crate::gate::DependencyGate;
use crate::logstore::LogStore;
use crate::models::service::{ServiceHandle, ServiceSpec, SessionInfo};
use crate::pipe::{send_pipe_command, PipeCommand, DEFAULT_PIPE_TIMEOUT};
use crate::registry::{resolve_reference, SessionRegistry};
use crate::roster::PaneRoster;
use crate::{AppError, Result};

pub use crash_scan::spawn_crash_scan;

/// Outcome of [`Orchestrator::start_all`].
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StartReport {
    /// Services spawned, in tab order.
    pub started: Vec<String>,
    /// `(service, error)` for services the backend refused.
    pub failed: Vec<(String, String)>,
}

/// Outcome of a command sent to every live service.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BulkReport {
    /// Services that accepted the command, in listing order.
    pub succeeded: Vec<String>,
    /// `(service, error)` for services that did not.
    pub failed: Vec<(String, String)>,
}

impl BulkReport {
    fn record(&mut self, name: &str, outcome: Result<()>) {
        match outcome {
            Ok(()) => self.succeeded.push(name.to_owned()),
            Err(err) => {
                warn!(service = %name, %err, "bulk command failed");
                self.failed.push((name.to_owned(), err.to_string()));
            }
        }
    }
}

/// Coordinates every service of one configuration.
pub struct Orchestrator {
    config: GlobalConfig,
    backend: Arc<dyn SessionBackend>,
    store: LogStore,
    roster: PaneRoster,
    registry: SessionRegistry,
    gate: DependencyGate,
    pipe_timeout: Duration,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backend", &self.backend.kind())
            .field("store", &self.store)
            .field("roster", &self.roster)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build an orchestrator. Nothing starts until [`Self::start_all`].
    #[must_use]
    pub fn new(
        config: GlobalConfig,
        backend: Arc<dyn SessionBackend>,
        store: LogStore,
        roster: PaneRoster,
    ) -> Self {
        Self {
            config,
            backend,
            store,
            roster,
            registry: SessionRegistry::new(),
            gate: DependencyGate::new(),
            pipe_timeout: DEFAULT_PIPE_TIMEOUT,
        }
    }

    /// Replace the dependency gate.
    #[must_use]
    pub fn with_gate(mut self, gate: DependencyGate) -> Self {
        self.gate = gate;
        self
    }

    /// Replace the pipe write timeout.
    #[must_use]
    pub fn with_pipe_timeout(mut self, timeout: Duration) -> Self {
        self.pipe_timeout = timeout;
        self
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Active backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn SessionBackend> {
        &self.backend
    }

    /// Handle cache.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Log store.
    #[must_use]
    pub fn log_store(&self) -> &LogStore {
        &self.store
    }

    /// Control pipe configured for `service`.
    #[must_use]
    pub fn pipe_for(&self, service: &str) -> Option<PathBuf> {
        self.config.service(service).and_then(|svc| svc.pipe.clone())
    }

    /// Gate dependencies, tear down the previous session, spawn every
    /// service, and persist the new roster.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Dependency` when the gate fails; no service is
    /// spawned in that case. Individual spawn failures are reported in the
    /// [`StartReport`] instead.
    pub async fn start_all(&self) -> Result<StartReport> {
        let span = info_span!("start_all", services = self.config.services.len());
        async move {
            self.gate.ensure(&self.config.dependency_specs()).await?;

            let recovered = self.roster.recover(self.backend.as_ref()).await;
            if recovered > 0 {
                info!(recovered, "previous session cleaned up");
            }

            let mut report = StartReport::default();
            for svc in &self.config.services {
                let spec = ServiceSpec::from_config(svc);
                match self.backend.spawn(&spec).await {
                    Ok(handle) => {
                        info!(service = %svc.name, handle_id = %handle.handle_id, "service started");
                        self.registry.register(handle);
                        report.started.push(svc.name.clone());
                    }
                    Err(err) => {
                        error!(service = %svc.name, %err, "service failed to start");
                        report.failed.push((svc.name.clone(), err.to_string()));
                    }
                }
            }

            if let Err(err) = self.roster.save(&self.backend.spawned_handles()) {
                warn!(%err, "failed to persist roster");
            }
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Spawn one configured service into the existing session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` listing configured names for an unknown
    /// service, `AppError::AlreadyExists` if it is already live, or the
    /// backend's attach/spawn error.
    pub async fn start_one(&self, name: &str) -> Result<ServiceHandle> {
        let spec = self.config.service_spec(name)?;
        self.backend.attach().await?;

        let live = self.live_sessions().await?;
        if live.iter().any(|s| s.name == spec.name) {
            return Err(AppError::AlreadyExists(format!(
                "{} is already running",
                spec.name
            )));
        }

        let handle = self.backend.spawn(&spec).await?;
        info!(service = %spec.name, handle_id = %handle.handle_id, "service started");
        self.registry.register(handle.clone());
        Ok(handle)
    }

    /// Live sessions from a fresh backend query; the registry is reconciled
    /// against it.
    ///
    /// # Errors
    ///
    /// Returns the backend's listing error.
    pub async fn live_sessions(&self) -> Result<Vec<SessionInfo>> {
        let live = self.backend.list().await?;
        self.registry.reconcile(&live);
        Ok(live)
    }

    /// Resolve a 1-based index or fuzzy name to a live session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` enumerating live names on no match.
    pub async fn resolve(&self, reference: &str) -> Result<SessionInfo> {
        let live = self.live_sessions().await?;
        resolve_reference(reference, &live)
    }

    /// Send `text` plus a newline to the referenced session.
    ///
    /// # Errors
    ///
    /// Returns resolution or backend errors.
    pub async fn send(&self, reference: &str, text: &str) -> Result<SessionInfo> {
        let session = self.resolve(reference).await?;
        self.backend.send_text(&session.handle_id, text).await?;
        Ok(session)
    }

    /// Last `lines` lines of live output from the referenced session.
    ///
    /// # Errors
    ///
    /// Returns resolution or backend errors.
    pub async fn logs(&self, reference: &str, lines: usize) -> Result<(SessionInfo, String)> {
        let session = self.resolve(reference).await?;
        let text = self.backend.read_output(&session.handle_id, lines).await?;
        Ok((session, text))
    }

    /// Bring the referenced session to the foreground.
    ///
    /// # Errors
    ///
    /// Returns resolution errors or `AppError::Unsupported`.
    pub async fn focus(&self, reference: &str) -> Result<SessionInfo> {
        let session = self.resolve(reference).await?;
        self.backend.focus(&session.handle_id).await?;
        Ok(session)
    }

    /// Stop the referenced service: `q` over its pipe, else kill its session.
    ///
    /// # Errors
    ///
    /// Returns resolution, pipe, or backend errors.
    pub async fn stop(&self, reference: &str) -> Result<SessionInfo> {
        let session = self.resolve(reference).await?;
        match self.pipe_for(&session.name) {
            Some(pipe) => send_pipe_command(&pipe, PipeCommand::Quit, self.pipe_timeout).await?,
            None => self.backend.kill(&session.handle_id).await?,
        }
        self.registry.remove(&session.name);
        info!(service = %session.name, "service stopped");
        Ok(session)
    }

    /// Restart the referenced service: `R` over its pipe, else kill and
    /// respawn it from configuration as a new lifecycle.
    ///
    /// Returns a short description of what was done.
    ///
    /// # Errors
    ///
    /// Returns resolution, pipe, or backend errors, or `AppError::NotFound`
    /// when the session has no configuration to respawn from.
    pub async fn restart(&self, reference: &str) -> Result<String> {
        let session = self.resolve(reference).await?;
        self.restart_session(&session).await
    }

    async fn restart_session(&self, session: &SessionInfo) -> Result<String> {
        if let Some(pipe) = self.pipe_for(&session.name) {
            send_pipe_command(&pipe, PipeCommand::Restart, self.pipe_timeout).await?;
            return Ok(format!("sent restart to {}", session.name));
        }

        let spec = self.config.service_spec(&session.name)?;
        self.backend.kill(&session.handle_id).await?;
        self.registry.remove(&session.name);
        let handle = self.backend.spawn(&spec).await?;
        let message = format!("restarted {} as {}", spec.name, handle.handle_id);
        info!(service = %spec.name, handle_id = %handle.handle_id, "service restarted");
        self.registry.register(handle);
        Ok(message)
    }

    /// Reload the referenced service: `r` over its pipe, else `r` as input.
    ///
    /// # Errors
    ///
    /// Returns resolution, pipe, or backend errors.
    pub async fn reload(&self, reference: &str) -> Result<SessionInfo> {
        let session = self.resolve(reference).await?;
        self.reload_session(&session).await?;
        Ok(session)
    }

    async fn reload_session(&self, session: &SessionInfo) -> Result<()> {
        match self.pipe_for(&session.name) {
            Some(pipe) => send_pipe_command(&pipe, PipeCommand::Reload, self.pipe_timeout).await,
            None => self.backend.send_text(&session.handle_id, "r").await,
        }
    }

    /// Reload every live service. One failure does not stop the rest.
    ///
    /// # Errors
    ///
    /// Returns the backend's listing error; per-service failures are
    /// reported in the [`BulkReport`].
    pub async fn reload_all(&self) -> Result<BulkReport> {
        let mut report = BulkReport::default();
        for session in self.live_sessions().await? {
            let outcome = self.reload_session(&session).await;
            report.record(&session.name, outcome);
        }
        info!(
            ok = report.succeeded.len(),
            failed = report.failed.len(),
            "reload sent to all services"
        );
        Ok(report)
    }

    /// Restart every live service. One failure does not stop the rest.
    ///
    /// # Errors
    ///
    /// Returns the backend's listing error; per-service failures are
    /// reported in the [`BulkReport`].
    pub async fn restart_all(&self) -> Result<BulkReport> {
        let mut report = BulkReport::default();
        for session in self.live_sessions().await? {
            let outcome = self.restart_session(&session).await.map(|_| ());
            report.record(&session.name, outcome);
        }
        info!(
            ok = report.succeeded.len(),
            failed = report.failed.len(),
            "restart sent to all services"
        );
        Ok(report)
    }

    /// Kill every session this orchestrator spawned. Individual failures are
    /// logged and skipped.
    pub async fn stop_all(&self) {
        for handle_id in self.backend.spawned_handles() {
            if let Err(err) = self.backend.kill(&handle_id).await {
                warn!(handle_id, %err, "failed to stop session");
            }
        }
        for name in self.registry.names() {
            self.registry.remove(&name);
        }
    }

    /// Ordered teardown: stop all, backend cleanup, clear the roster.
    pub async fn shutdown(&self) {
        info!("shutting down services");
        self.stop_all().await;
        if let Err(err) = self.backend.cleanup().await {
            warn!(%err, "backend cleanup failed");
        }
        if let Err(err) = self.roster.clear() {
            warn!(%err, "failed to clear roster");
        }
    }
}
