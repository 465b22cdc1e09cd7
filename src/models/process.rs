//! Lifecycle state for a supervised process.

use serde::{Deserialize, Serialize};

/// Lifecycle status of one supervised process instance.
///
/// A lifecycle only moves forward. Restarting a service creates a new
/// instance rather than resurrecting a terminal one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Pipes are being set up and the process launched.
    Starting,
    /// Process confirmed launched.
    Running,
    /// Stop requested; waiting for exit.
    Stopping,
    /// Process exited or was stopped.
    Stopped,
    /// Launch or supervision failed.
    Error,
}

impl ProcessState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Running)
                | (Self::Running, Self::Stopping | Self::Stopped)
                | (Self::Stopping, Self::Stopped)
                | (Self::Starting | Self::Running | Self::Stopping, Self::Error)
        )
    }

    /// Lowercase label used in status payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}
