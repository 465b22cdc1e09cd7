//! One-shot delayed crash scan.
//!
//! Runs once, a fixed delay after startup, as an early warning. It is not a
//! monitor and never restarts anything.

use std::io::Write;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::logstore::crash::failure_banner;
use crate::logstore::LogStore;

/// After `delay`, classify each service's latest log and announce failures.
///
/// The task resolves to the failed names, or to an empty list if `cancel`
/// fires first.
#[must_use]
pub fn spawn_crash_scan(
    store: LogStore,
    names: Vec<String>,
    delay: Duration,
    cancel: CancellationToken,
) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => return Vec::new(),
            () = tokio::time::sleep(delay) => {}
        }

        let failed = store.scan_failures(&names);
        if failed.is_empty() {
            info!(services = names.len(), "crash scan found no failures");
            return failed;
        }

        for name in &failed {
            let tab = names.iter().position(|n| n == name).map(|i| i + 1);
            warn!(
                service = %name,
                tab = ?tab,
                log = %store.latest_path(name).display(),
                "service exited with a failure"
            );
        }
        if let Err(err) = std::io::stderr()
            .lock()
            .write_all(failure_banner(&names, &failed).as_bytes())
        {
            warn!(%err, "failed to print crash banner");
        }
        failed
    })
}
