//! Persisted list of handles spawned by the previous run.
//!
//! Written once after a successful startup batch and read once at the next
//! startup, where every listed handle is killed before new sessions open.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::backend::SessionBackend;
use crate::{AppError, Result};

/// Flat file of handle ids, one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneRoster {
    path: PathBuf,
}

impl PaneRoster {
    /// Roster stored at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ids in file order. A missing file is an empty roster.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be read.
    pub fn load(&self) -> Result<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(AppError::Io(format!(
                "failed to read roster {}: {err}",
                self.path.display()
            ))),
        }
    }

    /// Replace the roster with `ids` (temp file, then rename).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be written.
    pub fn save(&self, ids: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension(format!("tmp.{}", std::process::id()));
        {
            let mut file = fs::File::create(&tmp)?;
            for id in ids {
                writeln!(file, "{id}")?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path).map_err(|err| {
            AppError::Io(format!(
                "failed to write roster {}: {err}",
                self.path.display()
            ))
        })?;
        debug!(path = %self.path.display(), count = ids.len(), "roster saved");
        Ok(())
    }

    /// Delete the roster file. Missing is fine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Kill every listed handle, ignoring individual failures, then clear.
    ///
    /// Returns the number of kills the backend accepted.
    pub async fn recover(&self, backend: &dyn SessionBackend) -> usize {
        let ids = match self.load() {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%err, "stale roster unreadable, skipping recovery");
                return 0;
            }
        };
        if ids.is_empty() {
            return 0;
        }

        info!(count = ids.len(), "tearing down previous session");
        let mut killed = 0;
        for id in &ids {
            match backend.kill(id).await {
                Ok(()) => killed += 1,
                Err(err) => debug!(handle_id = %id, %err, "stale handle already gone"),
            }
        }
        if let Err(err) = self.clear() {
            warn!(%err, "failed to clear roster");
        }
        killed
    }
}
