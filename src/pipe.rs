//! Single-character control protocol over a per-service named pipe.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::{AppError, Result};

/// Bound on a whole pipe write, including waiting for a reader.
pub const DEFAULT_PIPE_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(unix)]
const OPEN_RETRY: Duration = Duration::from_millis(50);

/// Commands understood by pipe-driven workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeCommand {
    /// `r`: reload.
    Reload,
    /// `R`: full restart.
    Restart,
    /// `s`: status dump.
    Status,
    /// `q`: graceful quit.
    Quit,
}

impl PipeCommand {
    /// Wire character.
    #[must_use]
    pub fn as_char(self) -> char {
        match self {
            Self::Reload => 'r',
            Self::Restart => 'R',
            Self::Status => 's',
            Self::Quit => 'q',
        }
    }

    /// Parse a wire character.
    #[must_use]
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'r' => Some(Self::Reload),
            'R' => Some(Self::Restart),
            's' => Some(Self::Status),
            'q' => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Write `cmd` and a newline to the pipe at `path`, within `timeout`.
///
/// # Errors
///
/// Returns `AppError::Control` when no reader opens the pipe in time, the
/// write does not complete in time, or the path is not a FIFO.
#[cfg(unix)]
pub async fn send_pipe_command(path: &Path, cmd: PipeCommand, timeout: Duration) -> Result<()> {
    use tokio::io::AsyncWriteExt;
    use tokio::net::unix::pipe;

    let line = format!("{}\n", cmd.as_char());
    let attempt = async {
        let mut sender = loop {
            match pipe::OpenOptions::new().open_sender(path) {
                Ok(sender) => break sender,
                // ENXIO: the FIFO exists but nobody is reading yet.
                Err(err) if err.raw_os_error() == Some(nix::libc::ENXIO) => {
                    tokio::time::sleep(OPEN_RETRY).await;
                }
                Err(err) => return Err(err),
            }
        };
        sender.write_all(line.as_bytes()).await?;
        sender.flush().await
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(())) => {
            info!(pipe = %path.display(), command = %cmd.as_char(), "pipe command sent");
            Ok(())
        }
        Ok(Err(err)) => Err(AppError::Control(format!(
            "pipe {} write failed: {err}",
            path.display()
        ))),
        Err(_elapsed) => {
            debug!(pipe = %path.display(), "pipe write timed out");
            Err(AppError::Control(format!(
                "pipe {} not accepting commands within {:?}; is the worker running?",
                path.display(),
                timeout
            )))
        }
    }
}

/// Named pipes are unavailable on this platform.
///
/// # Errors
///
/// Always returns `AppError::Unsupported`.
#[cfg(not(unix))]
pub async fn send_pipe_command(path: &Path, _cmd: PipeCommand, _timeout: Duration) -> Result<()> {
    Err(AppError::Unsupported(format!(
        "named pipe {} requires a unix platform",
        path.display()
    )))
}
