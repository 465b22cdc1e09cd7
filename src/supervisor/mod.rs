//! Lifecycle supervision for raw OS processes.
//!
//! A [`ManagedProcess`] owns one child. Two reader tasks drain stdout and
//! stderr into a bounded ring buffer, the console, and an optional log run.
//! An exit-waiter task owns the [`Child`] and performs graceful-then-forced
//! termination when the instance's cancellation token fires. All three tasks
//! publish through a single mutex; none of them waits on another.

pub mod manager;

use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::logstore::crash::{exit_footer, stopped_footer};
use crate::logstore::LogRun;
use crate::models::process::ProcessState;
use crate::models::service::ServiceSpec;
use crate::{AppError, Result};

pub use manager::ProcessManager;

/// Lines retained in the in-memory output ring.
pub const OUTPUT_RING_CAPACITY: usize = 1000;

/// Time a stopping process is given to exit before it is killed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// How long the exit-waiter lets readers drain after a natural exit.
const READER_DRAIN: Duration = Duration::from_secs(1);

/// Tunables shared by every process a manager launches.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Grace period between SIGTERM and SIGKILL.
    pub stop_grace: Duration,
    /// Echo captured lines to the orchestrator's stdout.
    pub mirror_console: bool,
    /// Ring buffer capacity in lines.
    pub ring_capacity: usize,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            stop_grace: DEFAULT_STOP_GRACE,
            mirror_console: true,
            ring_capacity: OUTPUT_RING_CAPACITY,
        }
    }
}

// ── Shared state ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Inner {
    state: ProcessState,
    exit_code: Option<i32>,
    output: VecDeque<String>,
    log: Option<File>,
}

impl Inner {
    fn transition(&mut self, next: ProcessState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            debug!(from = self.state.as_str(), to = next.as_str(), "transition ignored");
            false
        }
    }

    fn write_log(&mut self, text: &str) {
        if let Some(log) = self.log.as_mut() {
            if let Err(err) = log.write_all(text.as_bytes()) {
                warn!(%err, "log write failed, detaching log sink");
                self.log = None;
            }
        }
    }
}

/// One supervised child process.
#[derive(Debug)]
pub struct ManagedProcess {
    id: String,
    pid: Option<u32>,
    options: SupervisorOptions,
    inner: Mutex<Inner>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    cancel: CancellationToken,
    exited: watch::Receiver<bool>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl ManagedProcess {
    /// Launch `spec` and begin supervising it.
    ///
    /// Must be called within a Tokio runtime. On success the instance is
    /// already `Running`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the process cannot be launched or its
    /// stdio cannot be captured. No background task survives a failure.
    pub fn spawn(
        id: impl Into<String>,
        spec: &ServiceSpec,
        log: Option<&LogRun>,
        options: SupervisorOptions,
    ) -> Result<Arc<Self>> {
        let id = id.into();
        let log_file = match log {
            Some(run) => Some(run.open_append()?),
            None => None,
        };

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .current_dir(&spec.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Spawn(format!("failed to launch {id} ({}): {err}", spec.command))
        })?;

        let stdio = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(stdin), Some(stdout), Some(stderr)) = stdio else {
            if let Err(err) = child.start_kill() {
                warn!(%id, %err, "failed to kill child with missing stdio");
            }
            return Err(AppError::Spawn(format!("failed to capture stdio for {id}")));
        };

        let (exit_tx, exit_rx) = watch::channel(false);
        let process = Arc::new(Self {
            id,
            pid: child.id(),
            options,
            inner: Mutex::new(Inner {
                state: ProcessState::Starting,
                exit_code: None,
                output: VecDeque::new(),
                log: log_file,
            }),
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            cancel: CancellationToken::new(),
            exited: exit_rx,
            readers: Mutex::new(Vec::with_capacity(2)),
        });

        process.lock().transition(ProcessState::Running);
        info!(id = %process.id, pid = ?process.pid, command = %spec.command, "process started");

        let out = tokio::spawn(Arc::clone(&process).drain(stdout));
        let err = tokio::spawn(Arc::clone(&process).drain(stderr));
        if let Ok(mut readers) = process.readers.lock() {
            readers.push(out);
            readers.push(err);
        }
        tokio::spawn(Arc::clone(&process).wait_for_exit(child, exit_tx));

        Ok(process)
    }

    /// Instance identifier (the service name).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// OS process id, if the platform reported one.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.lock().state
    }

    /// Whether the process is `Running`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Exit code once the process has exited. Signal deaths report `128 + n`.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.lock().exit_code
    }

    /// Copy of the output ring, oldest first.
    #[must_use]
    pub fn output(&self) -> Vec<String> {
        self.lock().output.iter().cloned().collect()
    }

    /// Last `n` captured lines, oldest first.
    #[must_use]
    pub fn tail(&self, n: usize) -> Vec<String> {
        let inner = self.lock();
        let skip = inner.output.len().saturating_sub(n);
        inner.output.iter().skip(skip).cloned().collect()
    }

    /// Write `text` followed by a newline to the process's stdin.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotRunning` unless the process is `Running`, or
    /// `AppError::Io` if the write fails.
    pub async fn send_input(&self, text: &str) -> Result<()> {
        let state = self.state();
        if state != ProcessState::Running {
            return Err(AppError::NotRunning(format!(
                "{} is {}",
                self.id,
                state.as_str()
            )));
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| AppError::NotRunning(format!("{} stdin is closed", self.id)))?;
        let line = format!("{text}\n");
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| AppError::Io(format!("write to {} failed: {err}", self.id)))?;
        stdin
            .flush()
            .await
            .map_err(|err| AppError::Io(format!("flush to {} failed: {err}", self.id)))
    }

    /// Stop the process: SIGTERM, up to the grace period, then SIGKILL.
    ///
    /// Idempotent. Returns immediately when already stopping or stopped;
    /// otherwise returns once the exit has been observed. The final state is
    /// always `Stopped`.
    pub async fn stop(&self) {
        {
            let mut inner = self.lock();
            if matches!(
                inner.state,
                ProcessState::Stopping | ProcessState::Stopped | ProcessState::Error
            ) {
                return;
            }
            inner.transition(ProcessState::Stopping);
        }

        info!(id = %self.id, "stopping process");
        self.stdin.lock().await.take();
        self.cancel.cancel();
        self.wait().await;
    }

    /// Wait until the exit-waiter has observed the process exit.
    pub async fn wait(&self) {
        let mut rx = self.exited.clone();
        let _ = rx.wait_for(|done| *done).await;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, line: &str) {
        let stamp = Local::now().format("%H:%M:%S");
        let entry = format!("[{stamp}] [{}] {line}", self.id);
        {
            let mut inner = self.lock();
            if inner.output.len() >= self.options.ring_capacity {
                inner.output.pop_front();
            }
            inner.output.push_back(entry.clone());
            inner.write_log(&format!("[{stamp}] {line}\n"));
        }
        if self.options.mirror_console {
            if let Err(err) = writeln!(std::io::stdout().lock(), "{entry}") {
                warn!(id = %self.id, %err, "console mirror write failed");
            }
        }
    }

    async fn drain<R>(self: Arc<Self>, stream: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => self.record(&line),
                Ok(None) => break,
                Err(err) => {
                    debug!(id = %self.id, %err, "output reader stopped");
                    break;
                }
            }
        }
    }

    async fn wait_for_exit(self: Arc<Self>, mut child: Child, exit_tx: watch::Sender<bool>) {
        let (status, stopped) = tokio::select! {
            status = child.wait() => (status, false),
            () = self.cancel.cancelled() => (self.terminate(&mut child).await, true),
        };

        let readers: Vec<JoinHandle<()>> = self
            .readers
            .lock()
            .map(|mut guard| guard.drain(..).collect())
            .unwrap_or_default();
        for mut reader in readers {
            if stopped || tokio::time::timeout(READER_DRAIN, &mut reader).await.is_err() {
                reader.abort();
            }
        }

        let code = match &status {
            Ok(status) => exit_code_of(*status),
            Err(err) => {
                warn!(id = %self.id, %err, "failed to observe process exit");
                None
            }
        };

        {
            let mut inner = self.lock();
            inner.exit_code = code;
            inner.transition(ProcessState::Stopped);
            let footer = if stopped {
                stopped_footer()
            } else {
                exit_footer(code.unwrap_or(-1))
            };
            inner.write_log(&footer);
            inner.log = None;
        }

        if stopped {
            info!(id = %self.id, code = ?code, "process stopped");
        } else if code == Some(0) {
            info!(id = %self.id, "process exited");
        } else {
            warn!(id = %self.id, code = ?code, "process exited with failure");
        }
        let _ = exit_tx.send(true);
    }

    async fn terminate(&self, child: &mut Child) -> std::io::Result<ExitStatus> {
        send_sigterm(child);
        match tokio::time::timeout(self.options.stop_grace, child.wait()).await {
            Ok(status) => status,
            Err(_elapsed) => {
                warn!(
                    id = %self.id,
                    grace = ?self.options.stop_grace,
                    "process did not exit within grace period, forcing kill"
                );
                child.kill().await?;
                child.wait().await
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, %err, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        warn!(%err, "failed to kill child");
    }
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal().map(|sig| 128 + sig))
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> Option<i32> {
    status.code()
}
