//! Dependency descriptor evaluated by the readiness gate.

use std::time::Duration;

/// Timeout applied when a dependency does not declare one.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Stateless descriptor for one piece of external infrastructure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    /// Display name used in progress output and errors.
    pub name: String,
    /// Shell command; exit status 0 means ready.
    pub check_cmd: String,
    /// Shell command run once when the first check fails.
    pub start_cmd: Option<String>,
    /// How long to keep polling after the start command.
    pub timeout_seconds: u64,
}

impl DependencySpec {
    /// Construct a descriptor with the default timeout.
    #[must_use]
    pub fn new(name: impl Into<String>, check_cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            check_cmd: check_cmd.into(),
            start_cmd: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }

    /// Set the start command.
    #[must_use]
    pub fn with_start(mut self, start_cmd: impl Into<String>) -> Self {
        self.start_cmd = Some(start_cmd.into());
        self
    }

    /// Set the readiness timeout in seconds.
    #[must_use]
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Readiness timeout as a [`Duration`]. Zero falls back to the default.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        if self.timeout_seconds == 0 {
            Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)
        } else {
            Duration::from_secs(self.timeout_seconds)
        }
    }
}
