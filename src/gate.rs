//! Dependency readiness gate.
//!
//! Every dependency is checked in declaration order before any service is
//! spawned. A dependency that is down is started once and then polled until
//! its check passes or its timeout elapses. Any failure aborts startup.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use crate::models::dependency::DependencySpec;
use crate::{AppError, Result};

/// Interval between readiness polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Lines of start-command output included in a failure message.
const START_OUTPUT_LINES: usize = 5;

/// Runs check/start/poll cycles for external infrastructure.
#[derive(Debug, Clone)]
pub struct DependencyGate {
    poll_interval: Duration,
}

impl Default for DependencyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGate {
    /// Gate polling every two seconds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Gate with a custom poll interval.
    #[must_use]
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Poll interval in use.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Make every dependency ready, in order, or fail on the first that
    /// cannot be.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Dependency` naming the dependency when it is down
    /// without a start command, its start command fails, or it does not pass
    /// its check within the timeout.
    pub async fn ensure(&self, deps: &[DependencySpec]) -> Result<()> {
        for dep in deps {
            let span = info_span!("dependency", name = %dep.name);
            self.ensure_one(dep).instrument(span).await?;
        }
        Ok(())
    }

    async fn ensure_one(&self, dep: &DependencySpec) -> Result<()> {
        if self.check(dep).await {
            info!("dependency ready");
            return Ok(());
        }

        let Some(start_cmd) = dep.start_cmd.as_deref() else {
            return Err(AppError::Dependency(format!(
                "{} is not running and has no start command",
                dep.name
            )));
        };

        info!(command = start_cmd, "dependency down, starting");
        run_start(dep, start_cmd).await?;

        let polls = self.poll_until_ready(dep).await?;
        info!(polls, "dependency ready");
        Ok(())
    }

    /// Run the check command once. Spawn failures count as not ready.
    pub async fn check(&self, dep: &DependencySpec) -> bool {
        match shell(&dep.check_cmd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(err) => {
                warn!(name = %dep.name, %err, "check command could not run");
                false
            }
        }
    }

    /// Poll the check command until it passes or the timeout elapses.
    ///
    /// Checks at least once, and once more when the deadline lands
    /// between two intervals. Returns the number of checks run, which
    /// never exceeds `ceil(timeout / poll_interval)`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Dependency` naming the elapsed time on timeout.
    pub async fn poll_until_ready(&self, dep: &DependencySpec) -> Result<u32> {
        let started = Instant::now();
        let deadline = started + dep.timeout();
        let mut polls = 0u32;

        loop {
            let wake = (Instant::now() + self.poll_interval).min(deadline);
            tokio::time::sleep_until(wake).await;

            polls += 1;
            if self.check(dep).await {
                return Ok(polls);
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        Err(AppError::Dependency(format!(
            "{} did not become ready after {:.0}s ({polls} checks)",
            dep.name,
            started.elapsed().as_secs_f64()
        )))
    }
}

/// Run a start command. A trailing `&` detaches it; otherwise wait for it.
async fn run_start(dep: &DependencySpec, start_cmd: &str) -> Result<()> {
    let trimmed = start_cmd.trim_end();
    if let Some(background) = trimmed.strip_suffix('&') {
        shell(background.trim_end())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|err| {
                AppError::Dependency(format!("failed to start {}: {err}", dep.name))
            })?;
        return Ok(());
    }

    let output = shell(trimmed)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|err| AppError::Dependency(format!("failed to start {}: {err}", dep.name)))?;

    if output.status.success() {
        return Ok(());
    }

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    let excerpt: Vec<&str> = text.lines().take(START_OUTPUT_LINES).collect();
    Err(AppError::Dependency(format!(
        "failed to start {} ({}): {}",
        dep.name,
        output.status,
        excerpt.join(" | ")
    )))
}

fn shell(cmd: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(cmd);
    command
}
