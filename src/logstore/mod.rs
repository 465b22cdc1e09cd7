//! Per-service rotating log runs on disk.
//!
//! Layout: `<root>/<service>/<YYYY-MM-DD_HHMMSS>.log`, with a `latest.log`
//! symlink repointed at the newest run. At most [`MAX_RUNS`] runs are kept
//! per service; older runs are pruned whenever a new run begins.

pub mod crash;
pub mod wrapper;

use std::cmp::Reverse;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Runs retained per service.
pub const MAX_RUNS: usize = 10;

/// File name of the alias pointing at the newest run.
pub const LATEST_ALIAS: &str = "latest.log";

/// `chrono` format of run file stems.
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

const DEFAULT_LOG_ROOT: &str = "/tmp/devtabs-logs";

/// One run of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRun {
    /// Service name.
    pub service: String,
    /// Run identifier (file stem).
    pub timestamp_id: String,
    /// Absolute path of the run file.
    pub file_path: PathBuf,
}

impl LogRun {
    /// Open the run file for appending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be opened.
    pub fn open_append(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .map_err(|err| {
                AppError::Io(format!(
                    "failed to open log {}: {err}",
                    self.file_path.display()
                ))
            })
    }
}

/// A run file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEntry {
    /// Run identifier (file stem).
    pub timestamp_id: String,
    /// Path of the run file.
    pub path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
}

/// Which run a historical log read targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSelector {
    /// The run `latest.log` points at.
    Latest,
    /// List the available runs instead of reading one.
    List,
    /// A specific run by timestamp id.
    Timestamp(String),
}

impl RunSelector {
    /// Parse `latest`, `list`, or a timestamp id. Empty means `latest`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | "latest" => Self::Latest,
            "list" => Self::List,
            other => Self::Timestamp(other.trim_end_matches(".log").to_owned()),
        }
    }
}

/// Rotating log store rooted at a fixed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStore {
    root: PathBuf,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_ROOT)
    }
}

impl LogStore {
    /// Create a store rooted at `root`. Nothing is created until a run begins.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `service`'s runs. Callers taking names from
    /// outside the configuration check them with [`is_plain_name`] first.
    #[must_use]
    pub fn service_dir(&self, service: &str) -> PathBuf {
        self.root.join(service)
    }

    /// Path of the `latest.log` alias for `service`.
    #[must_use]
    pub fn latest_path(&self, service: &str) -> PathBuf {
        self.service_dir(service).join(LATEST_ALIAS)
    }

    /// Start a new run: create the file, write the run header for
    /// `command_line`, repoint the `latest.log` alias, and prune old runs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory, file, or alias cannot be
    /// written. Pruning failures are logged, not returned.
    pub fn begin_run(&self, service: &str, command_line: &str) -> Result<LogRun> {
        let dir = self.service_dir(service);
        fs::create_dir_all(&dir).map_err(|err| {
            AppError::Io(format!(
                "failed to create log directory {}: {err}",
                dir.display()
            ))
        })?;

        let base = Local::now().format(RUN_TIMESTAMP_FORMAT).to_string();
        let (timestamp_id, mut file) = create_unique_run(&dir, &base)?;
        let file_path = dir.join(format!("{timestamp_id}.log"));

        let header = crash::run_header(service, command_line, &file_path.to_string_lossy());
        file.write_all(header.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| AppError::Io(format!("failed to write log header: {err}")))?;

        point_latest(&dir, &file_path)?;

        if let Err(err) = self.prune(service) {
            warn!(service, %err, "log rotation failed");
        }

        debug!(service, path = %file_path.display(), "log run started");
        Ok(LogRun {
            service: service.to_owned(),
            timestamp_id,
            file_path,
        })
    }

    /// Delete all but the [`MAX_RUNS`] most recent runs of `service`.
    ///
    /// Returns the number of files removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be enumerated.
    pub fn prune(&self, service: &str) -> Result<usize> {
        let runs = self.list_runs(service)?;
        let mut removed = 0;
        for run in runs.iter().skip(MAX_RUNS) {
            match fs::remove_file(&run.path) {
                Ok(()) => removed += 1,
                Err(err) => warn!(service, path = %run.path.display(), %err, "failed to prune log run"),
            }
        }
        Ok(removed)
    }

    /// Runs of `service`, newest first. The alias is never included.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the glob pattern is invalid.
    pub fn list_runs(&self, service: &str) -> Result<Vec<RunEntry>> {
        let dir = self.service_dir(service);
        let pattern = format!(
            "{}/*.log",
            glob::Pattern::escape(&dir.to_string_lossy())
        );
        let paths = glob::glob(&pattern)
            .map_err(|err| AppError::Io(format!("invalid log pattern: {err}")))?;

        let mut runs: Vec<RunEntry> = paths
            .filter_map(std::result::Result::ok)
            .filter(|path| path.file_name().is_some_and(|name| name != LATEST_ALIAS))
            .filter(|path| !path.is_symlink())
            .filter_map(|path| {
                let timestamp_id = path.file_stem()?.to_string_lossy().into_owned();
                let size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                Some(RunEntry {
                    timestamp_id,
                    path,
                    size_bytes,
                })
            })
            .collect();

        runs.sort_by_key(|run| Reverse(run_sort_key(&run.timestamp_id)));
        Ok(runs)
    }

    /// Read the last `lines` lines of a run.
    ///
    /// [`RunSelector::List`] returns the run listing instead.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the run does not exist or either
    /// name would leave the service directory.
    pub fn read_run(&self, service: &str, selector: &RunSelector, lines: usize) -> Result<String> {
        if !is_plain_name(service) {
            return Err(AppError::NotFound(format!("invalid service name {service:?}")));
        }
        let path = match selector {
            RunSelector::List => return Ok(self.render_run_list(service)),
            RunSelector::Latest => self.latest_path(service),
            RunSelector::Timestamp(id) => {
                if !is_plain_name(id) {
                    return Err(AppError::NotFound(format!("invalid run id {id:?}")));
                }
                self.service_dir(service).join(format!("{id}.log"))
            }
        };

        let data = fs::read(&path).map_err(|err| {
            AppError::NotFound(format!("log {} unavailable: {err}", path.display()))
        })?;
        Ok(last_lines(&String::from_utf8_lossy(&data), lines))
    }

    /// Human-readable run listing for `service`, newest first.
    #[must_use]
    pub fn render_run_list(&self, service: &str) -> String {
        let runs = self.list_runs(service).unwrap_or_default();
        if runs.is_empty() {
            return format!("No log files for {service}");
        }

        let mut out = format!("=== Runs for {service} ===\n\n");
        for run in runs {
            #[allow(clippy::cast_precision_loss)] // Display only.
            let kb = run.size_bytes as f64 / 1024.0;
            let _ = writeln!(out, "  {} ({kb:.1} KB)", run.timestamp_id);
        }
        out
    }

    /// Summary of every service directory under the root.
    #[must_use]
    pub fn list_services(&self) -> String {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return format!(
                "No logs found. Start services to create logs.\nLocation: {}/<service>/",
                self.root.display()
            );
        };

        let mut names: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_dir()))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        let mut out = String::from("=== Log History ===\n\n");
        let mut any = false;
        for name in names {
            let count = self.list_runs(&name).map(|runs| runs.len()).unwrap_or(0);
            if count == 0 {
                continue;
            }
            any = true;
            match fs::metadata(self.latest_path(&name)).and_then(|m| m.modified()) {
                Ok(modified) => {
                    let _ = writeln!(
                        out,
                        "  {name}: {count} runs, latest: {}",
                        format_time(modified)
                    );
                }
                Err(_) => {
                    let _ = writeln!(out, "  {name}: {count} runs");
                }
            }
        }

        if !any {
            out.push_str("  (no runs recorded)\n");
        }
        out
    }

    /// Last `max_bytes` bytes of `service`'s latest run.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if there is no latest run.
    pub fn tail(&self, service: &str, max_bytes: u64) -> Result<String> {
        if !is_plain_name(service) {
            return Err(AppError::NotFound(format!("invalid service name {service:?}")));
        }
        let path = self.latest_path(service);
        let mut file = File::open(&path).map_err(|err| {
            AppError::NotFound(format!("log {} unavailable: {err}", path.display()))
        })?;
        let len = file.metadata()?.len();
        if len > max_bytes {
            file.seek(SeekFrom::Start(len - max_bytes))?;
        }
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Create `<base>.log`, or `<base>_N.log` if a same-second run exists.
fn create_unique_run(dir: &Path, base: &str) -> Result<(String, File)> {
    let mut seq = 0u32;
    loop {
        let id = if seq == 0 {
            base.to_owned()
        } else {
            format!("{base}_{seq}")
        };
        let path = dir.join(format!("{id}.log"));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((id, file)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => seq += 1,
            Err(err) => {
                return Err(AppError::Io(format!(
                    "failed to create log {}: {err}",
                    path.display()
                )))
            }
        }
    }
}

/// Atomically repoint `<dir>/latest.log` at `target`.
#[cfg(unix)]
fn point_latest(dir: &Path, target: &Path) -> Result<()> {
    let tmp = dir.join(format!(".{LATEST_ALIAS}.{}", std::process::id()));
    let _ = fs::remove_file(&tmp);
    let relative = target.file_name().map_or_else(|| target.to_path_buf(), PathBuf::from);
    std::os::unix::fs::symlink(&relative, &tmp)
        .map_err(|err| AppError::Io(format!("failed to create latest alias: {err}")))?;
    fs::rename(&tmp, dir.join(LATEST_ALIAS))
        .map_err(|err| AppError::Io(format!("failed to replace latest alias: {err}")))
}

#[cfg(not(unix))]
fn point_latest(dir: &Path, target: &Path) -> Result<()> {
    let tmp = dir.join(format!(".{LATEST_ALIAS}.{}", std::process::id()));
    fs::copy(target, &tmp)?;
    fs::rename(&tmp, dir.join(LATEST_ALIAS))?;
    Ok(())
}

/// Sort key: timestamp stem, then same-second sequence number.
fn run_sort_key(stem: &str) -> (String, u32) {
    const BASE_LEN: usize = "YYYY-MM-DD_HHMMSS".len();
    if stem.len() > BASE_LEN && stem.is_char_boundary(BASE_LEN) {
        let (base, rest) = stem.split_at(BASE_LEN);
        if let Some(seq) = rest.strip_prefix('_').and_then(|s| s.parse().ok()) {
            return (base.to_owned(), seq);
        }
    }
    (stem.to_owned(), 0)
}

/// Whether `name` is usable as a single path component under the log root.
#[must_use]
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains(['/', '\\', '\0'])
}

/// Last `n` lines of `text`, joined with `\n`.
#[must_use]
pub fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
