//! Terminal multiplexer backend driven through `wezterm cli`.
//!
//! Each service runs in its own tab of a single window. The first spawn opens
//! the window with `wezterm start`; every later spawn is placed into that
//! window with `wezterm cli spawn`. Tabs are titled with the service name so a
//! fresh listing can address them without any in-memory bookkeeping.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, info_span, warn, Instrument};

use super::runner::{CliOutput, CliRunner, SystemCliRunner};
use super::{BoxFuture, SessionBackend};
use crate::logstore::wrapper::wrap_service;
use crate::logstore::{last_lines, LogStore};
use crate::models::service::{BackendKind, ServiceHandle, ServiceSpec, SessionInfo};
use crate::{AppError, Result};

/// Multiplexer timing and program settings.
#[derive(Debug, Clone)]
pub struct WeztermOptions {
    /// Multiplexer executable.
    pub program: String,
    /// Wait between opening a window and listing it.
    pub settle_delay: Duration,
    /// Spawn attempts before giving up.
    pub spawn_attempts: u32,
    /// Fixed delay between spawn attempts.
    pub spawn_backoff: Duration,
}

impl Default for WeztermOptions {
    fn default() -> Self {
        Self {
            program: "wezterm".to_owned(),
            settle_delay: Duration::from_millis(1500),
            spawn_attempts: 5,
            spawn_backoff: Duration::from_millis(500),
        }
    }
}

/// One row of `wezterm cli list --format json`.
#[derive(Debug, Clone, Deserialize)]
pub struct PaneEntry {
    /// Window containing the pane.
    pub window_id: u64,
    /// Tab containing the pane.
    #[serde(default)]
    pub tab_id: u64,
    /// Pane identifier.
    pub pane_id: u64,
    /// Pane title (usually the foreground process).
    #[serde(default)]
    pub title: String,
    /// Tab title, set by `set-tab-title`.
    #[serde(default)]
    pub tab_title: String,
}

impl PaneEntry {
    /// Tab title, else pane title, else `unknown`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if !self.tab_title.trim().is_empty() {
            &self.tab_title
        } else if !self.title.trim().is_empty() {
            &self.title
        } else {
            "unknown"
        }
    }
}

#[derive(Debug, Default)]
struct Anchor {
    window_id: Option<String>,
    pane_id: Option<String>,
    spawned: Vec<(String, String)>,
}

/// [`SessionBackend`] that hosts services in `WezTerm` tabs.
pub struct WeztermBackend {
    runner: Arc<dyn CliRunner>,
    store: LogStore,
    options: WeztermOptions,
    anchor: Mutex<Anchor>,
}

impl std::fmt::Debug for WeztermBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeztermBackend")
            .field("options", &self.options)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl WeztermBackend {
    /// Backend using the real `wezterm` binary.
    #[must_use]
    pub fn new(store: LogStore) -> Self {
        Self::with_runner(Arc::new(SystemCliRunner), store, WeztermOptions::default())
    }

    /// Backend with an explicit runner and options.
    #[must_use]
    pub fn with_runner(runner: Arc<dyn CliRunner>, store: LogStore, options: WeztermOptions) -> Self {
        Self {
            runner,
            store,
            options,
            anchor: Mutex::new(Anchor::default()),
        }
    }

    /// Window all tabs are spawned into, once known.
    #[must_use]
    pub fn window_id(&self) -> Option<String> {
        self.lock().window_id.clone()
    }

    /// Pane used as the spawn anchor, once known.
    #[must_use]
    pub fn anchor_pane(&self) -> Option<String> {
        self.lock().pane_id.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Anchor> {
        self.anchor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn cli(&self, args: Vec<String>) -> Result<CliOutput> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("cli".to_owned());
        full.extend(args);
        self.runner.output(&self.options.program, &full).await
    }

    async fn cli_checked(&self, args: Vec<String>) -> Result<String> {
        let what = args.first().cloned().unwrap_or_default();
        let output = self.cli(args).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(AppError::Backend(format!(
                "wezterm cli {what} failed: {}",
                output.stderr.trim()
            )))
        }
    }

    /// Every pane the multiplexer reports, in listing order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` if the listing fails or is not valid JSON.
    pub async fn list_panes(&self) -> Result<Vec<PaneEntry>> {
        let raw = self
            .cli_checked(vec!["list".into(), "--format".into(), "json".into()])
            .await?;
        serde_json::from_str(&raw)
            .map_err(|err| AppError::Backend(format!("unreadable pane listing: {err}")))
    }

    /// Open a new window running the wrapped command and adopt the newest
    /// pane as the anchor.
    async fn open_window(&self, spec: &ServiceSpec, program: &str, args: &[String]) -> Result<String> {
        let mut start = vec![
            "start".to_owned(),
            "--cwd".to_owned(),
            path_arg(&spec.workdir),
            "--".to_owned(),
            program.to_owned(),
        ];
        start.extend(args.iter().cloned());
        self.runner
            .launch(&self.options.program, &start)
            .map_err(|err| AppError::Spawn(format!("failed to open window for {}: {err}", spec.name)))?;

        tokio::time::sleep(self.options.settle_delay).await;

        // New windows are appended; an unrelated window may already exist.
        let panes = self.list_panes().await.map_err(|err| {
            AppError::Spawn(format!("window for {} did not appear: {err}", spec.name))
        })?;
        let newest = panes.last().ok_or_else(|| {
            AppError::Spawn(format!("window for {} did not appear in listing", spec.name))
        })?;

        let window_id = newest.window_id.to_string();
        let pane_id = newest.pane_id.to_string();
        {
            let mut anchor = self.lock();
            anchor.window_id = Some(window_id.clone());
            anchor.pane_id = Some(pane_id.clone());
        }
        info!(window_id, pane_id, "window opened");
        Ok(pane_id)
    }

    /// Spawn a tab next to the anchor, retrying while the mux warms up.
    async fn spawn_tab(&self, spec: &ServiceSpec, program: &str, args: &[String]) -> Result<String> {
        let (window_id, pane_id) = {
            let anchor = self.lock();
            (anchor.window_id.clone(), anchor.pane_id.clone())
        };

        let mut base = vec!["spawn".to_owned()];
        match (window_id, pane_id) {
            (Some(window), _) => base.extend(["--window-id".to_owned(), window]),
            (None, Some(pane)) => base.extend(["--pane-id".to_owned(), pane]),
            (None, None) => {
                return Err(AppError::Spawn("no anchor window to spawn into".into()));
            }
        }
        base.extend([
            "--cwd".to_owned(),
            path_arg(&spec.workdir),
            "--".to_owned(),
            program.to_owned(),
        ]);
        base.extend(args.iter().cloned());

        let attempts = self.options.spawn_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.cli(base.clone()).await {
                Ok(output) if output.success && !output.stdout.trim().is_empty() => {
                    return Ok(output.stdout.trim().to_owned());
                }
                Ok(output) => last_error = output.stderr.trim().to_owned(),
                Err(err) => last_error = err.to_string(),
            }
            if attempt < attempts {
                debug!(attempt, error = %last_error, "spawn failed, retrying");
                tokio::time::sleep(self.options.spawn_backoff).await;
            }
        }

        Err(AppError::Spawn(format!(
            "failed to spawn {} after {attempts} attempts: {last_error}",
            spec.name
        )))
    }

    async fn set_title(&self, pane_id: &str, title: &str) {
        let args = vec![
            "set-tab-title".to_owned(),
            "--pane-id".to_owned(),
            pane_id.to_owned(),
            title.to_owned(),
        ];
        if let Err(err) = self.cli_checked(args).await {
            warn!(pane_id, title, %err, "failed to set tab title");
        }
    }

    fn session_info(&self, name: &str, handle_id: String) -> SessionInfo {
        SessionInfo {
            name: name.to_owned(),
            handle_id,
            log_dir: self.store.service_dir(name),
            log_path: self.store.latest_path(name),
        }
    }
}

impl SessionBackend for WeztermBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Wezterm
    }

    fn attach(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.anchor_pane().is_some() {
                return Ok(());
            }
            let panes = self.list_panes().await?;
            let first = panes.first().ok_or_else(|| {
                AppError::Backend("no wezterm panes found; is the orchestrator running?".into())
            })?;
            let mut anchor = self.lock();
            anchor.window_id = Some(first.window_id.to_string());
            anchor.pane_id = Some(first.pane_id.to_string());
            info!(pane_id = first.pane_id, "attached to existing window");
            Ok(())
        })
    }

    fn spawn<'a>(&'a self, spec: &'a ServiceSpec) -> BoxFuture<'a, ServiceHandle> {
        let span = info_span!("wezterm_spawn", service = %spec.name);
        Box::pin(
            async move {
                let (program, args) = wrap_service(&self.store, spec);
                let pane_id = if self.anchor_pane().is_none() {
                    self.open_window(spec, &program, &args).await?
                } else {
                    self.spawn_tab(spec, &program, &args).await?
                };

                self.set_title(&pane_id, &spec.name).await;
                {
                    let mut anchor = self.lock();
                    anchor.spawned.retain(|(name, _)| name != &spec.name);
                    anchor.spawned.push((spec.name.clone(), pane_id.clone()));
                }
                info!(pane_id, "service spawned");

                Ok(ServiceHandle::new(
                    spec,
                    BackendKind::Wezterm,
                    pane_id,
                    self.store.service_dir(&spec.name),
                ))
            }
            .instrument(span),
        )
    }

    fn list(&self) -> BoxFuture<'_, Vec<SessionInfo>> {
        Box::pin(async move {
            let window = self.window_id();
            let panes = self.list_panes().await?;
            Ok(panes
                .iter()
                .filter(|pane| {
                    window
                        .as_deref()
                        .is_none_or(|w| pane.window_id.to_string() == w)
                })
                .map(|pane| self.session_info(pane.display_name(), pane.pane_id.to_string()))
                .collect())
        })
    }

    fn send_text<'a>(&'a self, handle_id: &'a str, text: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.cli_checked(vec![
                "send-text".into(),
                "--pane-id".into(),
                handle_id.to_owned(),
                "--no-paste".into(),
                format!("{text}\n"),
            ])
            .await
            .map(drop)
        })
    }

    fn read_output<'a>(&'a self, handle_id: &'a str, lines: usize) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let text = self
                .cli_checked(vec![
                    "get-text".into(),
                    "--pane-id".into(),
                    handle_id.to_owned(),
                    "--start-line".into(),
                    format!("-{lines}"),
                ])
                .await?;
            Ok(last_lines(text.trim_end(), lines))
        })
    }

    fn focus<'a>(&'a self, handle_id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.cli_checked(vec![
                "activate-pane".into(),
                "--pane-id".into(),
                handle_id.to_owned(),
            ])
            .await
            .map(drop)
        })
    }

    fn kill<'a>(&'a self, handle_id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let result = self
                .cli_checked(vec![
                    "kill-pane".into(),
                    "--pane-id".into(),
                    handle_id.to_owned(),
                ])
                .await
                .map(drop);

            let mut anchor = self.lock();
            anchor.spawned.retain(|(_, pane)| pane != handle_id);
            if anchor.pane_id.as_deref() == Some(handle_id) {
                // Keep spawning into the window; only the pane is gone.
                anchor.pane_id = anchor.spawned.first().map(|(_, pane)| pane.clone());
                if anchor.pane_id.is_none() {
                    anchor.window_id = None;
                }
            }
            result
        })
    }

    fn spawned_handles(&self) -> Vec<String> {
        self.lock()
            .spawned
            .iter()
            .map(|(_, pane)| pane.clone())
            .collect()
    }

    fn cleanup(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            for pane_id in self.spawned_handles() {
                if let Err(err) = self.kill(&pane_id).await {
                    debug!(pane_id, %err, "pane already gone");
                }
            }
            *self.lock() = Anchor::default();
            Ok(())
        })
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
