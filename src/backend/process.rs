//! Direct-process backend: services are children of the orchestrator.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, info_span, Instrument};

use super::{BoxFuture, SessionBackend};
use crate::logstore::LogStore;
use crate::models::service::{BackendKind, ServiceHandle, ServiceSpec, SessionInfo};
use crate::supervisor::{ManagedProcess, ProcessManager, SupervisorOptions};
use crate::{AppError, Result};

/// [`SessionBackend`] over a [`ProcessManager`]. Handle ids are PIDs.
#[derive(Debug)]
pub struct ProcessBackend {
    manager: ProcessManager,
    store: LogStore,
    order: Mutex<Vec<String>>,
}

impl ProcessBackend {
    /// Backend writing runs into `store`.
    #[must_use]
    pub fn new(store: LogStore, options: SupervisorOptions) -> Self {
        Self {
            manager: ProcessManager::new(options),
            store,
            order: Mutex::new(Vec::new()),
        }
    }

    /// Underlying process manager.
    #[must_use]
    pub fn manager(&self) -> &ProcessManager {
        &self.manager
    }

    fn order(&self) -> MutexGuard<'_, Vec<String>> {
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live(&self) -> Vec<Arc<ManagedProcess>> {
        let names = self.order().clone();
        names
            .iter()
            .filter_map(|name| self.manager.get(name))
            .filter(|process| !process.state().is_terminal())
            .collect()
    }

    /// Find a process by PID handle, or by name as a fallback.
    fn by_handle(&self, handle_id: &str) -> Result<Arc<ManagedProcess>> {
        let names = self.order().clone();
        names
            .iter()
            .filter_map(|name| self.manager.get(name))
            .find(|process| handle_of(process) == handle_id)
            .or_else(|| self.manager.get(handle_id))
            .ok_or_else(|| AppError::NotFound(format!("no process with handle {handle_id}")))
    }
}

fn handle_of(process: &ManagedProcess) -> String {
    process
        .pid()
        .map_or_else(|| process.id().to_owned(), |pid| pid.to_string())
}

impl SessionBackend for ProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
    }

    fn attach(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn spawn<'a>(&'a self, spec: &'a ServiceSpec) -> BoxFuture<'a, ServiceHandle> {
        let span = info_span!("process_spawn", service = %spec.name);
        Box::pin(
            async move {
                let run = self.store.begin_run(&spec.name, &spec.command_line())?;
                let process = self.manager.start(&spec.name, spec, Some(&run))?;
                {
                    let mut order = self.order();
                    if !order.contains(&spec.name) {
                        order.push(spec.name.clone());
                    }
                }
                let handle_id = handle_of(&process);
                info!(pid = %handle_id, log = %run.file_path.display(), "service spawned");
                Ok(ServiceHandle::new(
                    spec,
                    BackendKind::Process,
                    handle_id,
                    self.store.service_dir(&spec.name),
                ))
            }
            .instrument(span),
        )
    }

    fn list(&self) -> BoxFuture<'_, Vec<SessionInfo>> {
        Box::pin(async move {
            Ok(self
                .live()
                .iter()
                .map(|process| SessionInfo {
                    name: process.id().to_owned(),
                    handle_id: handle_of(process),
                    log_dir: self.store.service_dir(process.id()),
                    log_path: self.store.latest_path(process.id()),
                })
                .collect())
        })
    }

    fn send_text<'a>(&'a self, handle_id: &'a str, text: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.by_handle(handle_id)?.send_input(text).await })
    }

    fn read_output<'a>(&'a self, handle_id: &'a str, lines: usize) -> BoxFuture<'a, String> {
        Box::pin(async move { Ok(self.by_handle(handle_id)?.tail(lines).join("\n")) })
    }

    fn focus<'a>(&'a self, _handle_id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async {
            Err(AppError::Unsupported(
                "focus requires a terminal backend".into(),
            ))
        })
    }

    fn kill<'a>(&'a self, handle_id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.by_handle(handle_id)?.stop().await;
            Ok(())
        })
    }

    fn spawned_handles(&self) -> Vec<String> {
        self.live().iter().map(|process| handle_of(process)).collect()
    }

    fn cleanup(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.manager.stop_all().await;
            Ok(())
        })
    }
}
