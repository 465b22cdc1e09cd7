//! Bash wrapper that gives multiplexer panes durable, rotated logs.
//!
//! The wrapper mirrors [`LogStore::begin_run`] in shell so the capture keeps
//! working even though the pane's process is not our child.

use std::fmt::Write as _;

use super::{LogStore, LATEST_ALIAS, MAX_RUNS, RUN_TIMESTAMP_FORMAT};
use crate::models::service::ServiceSpec;

/// Program used to run the wrapper script.
pub const WRAPPER_SHELL: &str = "/bin/bash";

/// Build `(program, args)` running `command args…` under the log wrapper.
///
/// The script creates the service directory, opens a timestamped run,
/// repoints `latest.log` atomically, prunes to the newest runs, tees combined
/// output into the run, and writes the exit footer. A non-zero exit prints the
/// log path and waits for Enter so the pane stays open.
#[must_use]
pub fn wrap_command(
    store: &LogStore,
    service: &str,
    command: &str,
    args: &[String],
) -> (String, Vec<String>) {
    build(store, service, command, args, "")
}

/// Like [`wrap_command`], exporting `spec.env` before the command runs.
#[must_use]
pub fn wrap_service(store: &LogStore, spec: &ServiceSpec) -> (String, Vec<String>) {
    let mut keys: Vec<&String> = spec.env.keys().collect();
    keys.sort();
    let mut exports = String::new();
    for key in keys {
        let _ = writeln!(
            exports,
            "export {key}={}",
            shell_words::quote(&spec.env[key])
        );
    }
    build(store, &spec.name, &spec.command, &spec.args, &exports)
}

fn build(
    store: &LogStore,
    service: &str,
    command: &str,
    args: &[String],
    exports: &str,
) -> (String, Vec<String>) {
    let log_dir = store.service_dir(service);
    let log_dir = shell_words::quote(&log_dir.to_string_lossy()).into_owned();
    let service_q = shell_words::quote(service).into_owned();

    let mut words = Vec::with_capacity(args.len() + 1);
    words.push(command);
    words.extend(args.iter().map(String::as_str));
    let command_line = shell_words::join(words);
    let command_line_q = shell_words::quote(&command_line).into_owned();

    let script = format!(
        r#"LOG_DIR={log_dir}
mkdir -p "$LOG_DIR"
TIMESTAMP=$(date +{ts_fmt})
LOG_FILE="$LOG_DIR/$TIMESTAMP.log"
SEQ=1
while [ -e "$LOG_FILE" ]; do LOG_FILE="$LOG_DIR/${{TIMESTAMP}}_$SEQ.log"; SEQ=$((SEQ + 1)); done
TMP_LINK="$LOG_DIR/.{alias}.$$"
ln -sfn "$(basename "$LOG_FILE")" "$TMP_LINK" && mv -f "$TMP_LINK" "$LOG_DIR/{alias}"
ls -1t "$LOG_DIR"/*.log 2>/dev/null | grep -v '/{alias}$' | tail -n +{keep_from} | while IFS= read -r old; do rm -f -- "$old"; done
{{
  echo "=== "{service_q}" ==="
  echo "Command: "{command_line_q}
  echo "Started: $(date)"
  echo "Log: $LOG_FILE"
  echo ""
}} >> "$LOG_FILE"
{exports}{command_line} 2>&1 | tee -a "$LOG_FILE"
EXIT_CODE=${{PIPESTATUS[0]}}
echo "" >> "$LOG_FILE"
echo "=== Exited with code $EXIT_CODE at $(date) ===" >> "$LOG_FILE"
if [ "$EXIT_CODE" -ne 0 ]; then
  echo ""
  echo "*** "{service_q}" exited with code $EXIT_CODE ***"
  echo "Log: $LOG_FILE"
  echo "Press Enter to close..."
  read -r _
fi
exit "$EXIT_CODE"
"#,
        ts_fmt = shell_words::quote(RUN_TIMESTAMP_FORMAT),
        alias = LATEST_ALIAS,
        keep_from = MAX_RUNS + 1,
    );

    (WRAPPER_SHELL.to_owned(), vec!["-c".to_owned(), script])
}
