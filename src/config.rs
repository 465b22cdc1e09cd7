//! Global configuration parsing and validation.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::logstore::is_plain_name;
use crate::models::dependency::DependencySpec;
use crate::models::service::ServiceSpec;
use crate::{AppError, Result};

/// Which session backend hosts the services.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendChoice {
    /// Tabs of a `WezTerm` window driven through `wezterm cli`.
    #[default]
    Wezterm,
    /// Raw child processes with owned stdio pipes.
    Process,
}

/// Control-plane HTTP settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ApiConfig {
    /// Local port the control plane listens on.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

/// External infrastructure that must be reachable before services start.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DependencyConfig {
    /// Display name (e.g. `postgres`).
    pub name: String,
    /// Shell command; exit status 0 means ready.
    pub check: String,
    /// Shell command that starts the dependency when the check fails.
    #[serde(default)]
    pub start: Option<String>,
    /// Seconds to wait for the check to pass after starting.
    #[serde(default = "default_dependency_timeout")]
    pub timeout: u64,
}

/// One service definition.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServiceConfig {
    /// Unique service name; also the tab title and log directory name.
    pub name: String,
    /// Program to execute.
    pub command: String,
    /// Program arguments; `$VAR` references are expanded at spawn time.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; relative paths resolve against the config file.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Named pipe the service reads single-character commands from.
    #[serde(default)]
    pub pipe: Option<PathBuf>,
}

fn default_api_port() -> u16 {
    9876
}

fn default_dependency_timeout() -> u64 {
    30
}

fn default_log_root() -> PathBuf {
    PathBuf::from("/tmp/devtabs-logs")
}

fn default_roster_path() -> PathBuf {
    PathBuf::from("/tmp/devtabs-panes.txt")
}

fn default_crash_scan_delay() -> u64 {
    15
}

/// Global configuration parsed from `devtabs.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Session backend selection.
    #[serde(default)]
    pub backend: BackendChoice,
    /// Root directory for per-service log runs.
    #[serde(default = "default_log_root")]
    pub log_root: PathBuf,
    /// File listing pane ids spawned by the previous run.
    #[serde(default = "default_roster_path")]
    pub roster_path: PathBuf,
    /// Delay before the one-shot crash scan runs.
    #[serde(default = "default_crash_scan_delay")]
    pub crash_scan_delay_seconds: u64,
    /// Control-plane settings.
    #[serde(default)]
    pub api: ApiConfig,
    /// Dependencies checked, in order, before any service starts.
    #[serde(default)]
    pub dependencies: Vec<DependencyConfig>,
    /// Services, in tab order.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// Relative service working directories are resolved against the
    /// directory containing the file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        if let Some(base) = path.parent() {
            config.resolve_workdirs(base);
        }
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a service definition by exact name.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|svc| svc.name == name)
    }

    /// Service names in declaration (tab) order.
    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|svc| svc.name.clone()).collect()
    }

    /// Dependency descriptors in declaration order.
    #[must_use]
    pub fn dependency_specs(&self) -> Vec<DependencySpec> {
        self.dependencies
            .iter()
            .map(|dep| DependencySpec {
                name: dep.name.clone(),
                check_cmd: dep.check.clone(),
                start_cmd: dep.start.clone().filter(|cmd| !cmd.trim().is_empty()),
                timeout_seconds: dep.timeout,
            })
            .collect()
    }

    /// Build the spawnable spec for a named service.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` listing the configured names when the
    /// service is unknown.
    pub fn service_spec(&self, name: &str) -> Result<ServiceSpec> {
        self.service(name).map(ServiceSpec::from_config).ok_or_else(|| {
            AppError::NotFound(format!(
                "service {name:?} not found in config (available: {})",
                self.service_names().join(", ")
            ))
        })
    }

    fn resolve_workdirs(&mut self, base: &Path) {
        for svc in &mut self.services {
            if let Some(dir) = svc.workdir.as_mut() {
                if dir.is_relative() {
                    *dir = base.join(&*dir);
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            return Err(AppError::Config("at least one service is required".into()));
        }

        let mut seen = HashSet::new();
        for svc in &self.services {
            if svc.name.trim().is_empty() {
                return Err(AppError::Config("service name must not be empty".into()));
            }
            if !is_plain_name(&svc.name) {
                return Err(AppError::Config(format!(
                    "service name {:?} cannot be used as a log directory",
                    svc.name
                )));
            }
            if svc.command.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "service {} has an empty command",
                    svc.name
                )));
            }
            if let Some(key) = svc.env.keys().find(|key| !is_env_key(key)) {
                return Err(AppError::Config(format!(
                    "service {} has an invalid environment variable name {key:?}",
                    svc.name
                )));
            }
            if !seen.insert(svc.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate service name: {}",
                    svc.name
                )));
            }
        }

        for dep in &self.dependencies {
            if dep.check.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "dependency {} has an empty check command",
                    dep.name
                )));
            }
        }

        Ok(())
    }
}

/// Whether `key` can be exported by a POSIX shell.
fn is_env_key(key: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(key))
}
