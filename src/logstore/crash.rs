//! Exit markers and the delayed crash-tail classification.

use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;
use tracing::debug;

use super::LogStore;

/// Bytes read from the end of a `latest.log` when classifying it.
pub const TAIL_BYTES: u64 = 2048;

/// Footer written when a service exits on its own.
#[must_use]
pub fn exit_footer(code: i32) -> String {
    format!(
        "\n=== Exited with code {code} at {} ===\n",
        Local::now().format("%a %b %e %H:%M:%S %Y")
    )
}

/// Footer written when the orchestrator stopped a service deliberately.
#[must_use]
pub fn stopped_footer() -> String {
    format!(
        "\n=== Stopped at {} ===\n",
        Local::now().format("%a %b %e %H:%M:%S %Y")
    )
}

/// Header written at the top of every run.
#[must_use]
pub fn run_header(service: &str, command_line: &str, log_path: &str) -> String {
    format!(
        "=== {service} ===\nCommand: {command_line}\nStarted: {}\nLog: {log_path}\n\n",
        Local::now().format("%a %b %e %H:%M:%S %Y")
    )
}

/// Exit code of the last `Exited with code N` marker in `tail`, if any.
#[must_use]
pub fn classify_tail(tail: &str) -> Option<i32> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"Exited with code (-?\d+)").ok())
        .as_ref()?;

    pattern
        .captures_iter(tail)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Whether `tail` records a non-zero exit.
#[must_use]
pub fn is_failure(tail: &str) -> bool {
    classify_tail(tail).is_some_and(|code| code != 0)
}

impl LogStore {
    /// Names (in input order) whose latest run ended with a non-zero exit.
    ///
    /// Services without a readable `latest.log` are skipped.
    #[must_use]
    pub fn scan_failures(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|name| match self.tail(name, TAIL_BYTES) {
                Ok(tail) => is_failure(&tail),
                Err(err) => {
                    debug!(service = %name, %err, "crash scan skipped service");
                    false
                }
            })
            .cloned()
            .collect()
    }
}

/// High-visibility banner listing failed services and their tab numbers.
///
/// `order` is the full service list; tab numbers are 1-based positions in it.
#[must_use]
pub fn failure_banner(order: &[String], failed: &[String]) -> String {
    const RED: &str = "\x1b[1;31m";
    const RESET: &str = "\x1b[0m";

    let mut out = String::new();
    out.push_str(RED);
    out.push_str("\n════════════════════════════════════════════════════\n");
    out.push_str("  SERVICE FAILURE DETECTED\n");
    out.push_str("════════════════════════════════════════════════════\n");
    for name in failed {
        match order.iter().position(|candidate| candidate == name) {
            Some(idx) => out.push_str(&format!("  ✗ {name} (tab {})\n", idx + 1)),
            None => out.push_str(&format!("  ✗ {name}\n")),
        }
    }
    out.push_str("\n  Read the log with the logfile tool, e.g.\n");
    if let Some(first) = failed.first() {
        out.push_str(&format!("    logfile service={first} run=latest\n"));
    }
    out.push_str("════════════════════════════════════════════════════\n");
    out.push_str(RESET);
    out
}
