//! Error types shared across the orchestrator, control plane, and bridge.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// External dependency never became ready, or could not be started.
    Dependency(String),
    /// Session backend rejected a spawn after all retries.
    Spawn(String),
    /// A caller reference matched no live session.
    NotFound(String),
    /// A live entry with the same name or id already exists.
    AlreadyExists(String),
    /// Operation requires a running process.
    NotRunning(String),
    /// Session backend command failed or the backend is unavailable.
    Backend(String),
    /// Control-channel failure: pipe write, HTTP call, or timeout.
    Control(String),
    /// The active backend does not support the requested operation.
    Unsupported(String),
    /// Agent bridge transport or JSON payload failure.
    Rpc(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Dependency(msg) => write!(f, "dependency: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
            Self::NotRunning(msg) => write!(f, "not running: {msg}"),
            Self::Backend(msg) => write!(f, "backend: {msg}"),
            Self::Control(msg) => write!(f, "control: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Self::Rpc(msg) => write!(f, "rpc: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Rpc(format!("invalid json: {err}"))
    }
}
