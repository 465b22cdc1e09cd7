//! Seam between the multiplexer backend and the programs it shells out to.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::BoxFuture;
use crate::{AppError, Result};

/// Captured result of one CLI invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOutput {
    /// Whether the program exited with status 0.
    pub success: bool,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CliOutput {
    /// Successful output with `stdout`.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with `stderr`.
    #[must_use]
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs external programs on behalf of a backend.
pub trait CliRunner: Send + Sync {
    /// Run to completion and capture output.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` if the program cannot be executed at all.
    /// A non-zero exit is reported through [`CliOutput::success`].
    fn output<'a>(&'a self, program: &'a str, args: &'a [String]) -> BoxFuture<'a, CliOutput>;

    /// Start a program without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` if the program cannot be started.
    fn launch(&self, program: &str, args: &[String]) -> Result<()>;
}

/// [`CliRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCliRunner;

impl CliRunner for SystemCliRunner {
    fn output<'a>(&'a self, program: &'a str, args: &'a [String]) -> BoxFuture<'a, CliOutput> {
        Box::pin(async move {
            debug!(program, ?args, "running cli");
            let output = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|err| AppError::Backend(format!("failed to run {program}: {err}")))?;
            Ok(CliOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }

    fn launch(&self, program: &str, args: &[String]) -> Result<()> {
        debug!(program, ?args, "launching detached");
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map(drop)
            .map_err(|err| AppError::Backend(format!("failed to launch {program}: {err}")))
    }
}
