//! Service specs, handles, and live session rows.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;

/// Which backend owns a handle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Terminal multiplexer pane; handle id is the pane id.
    Wezterm,
    /// Raw child process; handle id is the PID.
    Process,
}

impl BackendKind {
    /// Lowercase label used in status payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wezterm => "wezterm",
            Self::Process => "process",
        }
    }
}

/// Everything a backend needs to launch one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Service name.
    pub name: String,
    /// Program to execute.
    pub command: String,
    /// Arguments with environment references already expanded.
    pub args: Vec<String>,
    /// Working directory.
    pub workdir: PathBuf,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Optional control pipe for the single-character worker protocol.
    pub pipe: Option<PathBuf>,
}

impl ServiceSpec {
    /// Minimal spec running `command` in the current directory.
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            workdir: current_dir(),
            env: HashMap::new(),
            pipe: None,
        }
    }

    /// Build a spec from configuration, expanding `$VAR` and `${VAR}` in args.
    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            name: config.name.clone(),
            command: config.command.clone(),
            args: config.args.iter().map(|arg| expand_env(arg)).collect(),
            workdir: config.workdir.clone().unwrap_or_else(current_dir),
            env: config.env.clone(),
            pipe: config.pipe.clone(),
        }
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Human-readable command line, shell-quoted.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.command.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }
}

/// A spawned service as tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceHandle {
    /// Service name.
    pub name: String,
    /// Owning backend.
    pub backend_kind: BackendKind,
    /// Opaque backend identifier: pane id or PID.
    pub handle_id: String,
    /// Working directory the service runs in.
    pub workdir: PathBuf,
    /// Program executed.
    pub command: String,
    /// Arguments passed.
    pub args: Vec<String>,
    /// Directory holding this service's log runs.
    pub log_dir: PathBuf,
}

impl ServiceHandle {
    /// Build a handle for `spec` once a backend has assigned `handle_id`.
    #[must_use]
    pub fn new(
        spec: &ServiceSpec,
        backend_kind: BackendKind,
        handle_id: impl Into<String>,
        log_dir: PathBuf,
    ) -> Self {
        Self {
            name: spec.name.clone(),
            backend_kind,
            handle_id: handle_id.into(),
            workdir: spec.workdir.clone(),
            command: spec.command.clone(),
            args: spec.args.clone(),
            log_dir,
        }
    }
}

/// One row of a live backend listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    /// Display name (tab title or service name).
    pub name: String,
    /// Backend identifier.
    #[serde(rename = "pane_id")]
    pub handle_id: String,
    /// Log directory for this name.
    pub log_dir: PathBuf,
    /// `latest.log` alias for this name.
    pub log_path: PathBuf,
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Expand `$VAR` and `${VAR}` from the process environment.
///
/// Unset variables expand to an empty string.
#[must_use]
pub fn expand_env(input: &str) -> String {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(pattern) = PATTERN
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").ok())
    else {
        return input.to_owned();
    };

    pattern
        .replace_all(input, |caps: &Captures<'_>| {
            let key = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            std::env::var(key).unwrap_or_default()
        })
        .into_owned()
}
