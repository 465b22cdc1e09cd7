//! Keyed collection of supervised processes.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::join_all;
use tracing::info;

use super::{ManagedProcess, SupervisorOptions};
use crate::logstore::LogRun;
use crate::models::process::ProcessState;
use crate::models::service::ServiceSpec;
use crate::{AppError, Result};

/// Owns every [`ManagedProcess`] by id; at most one live instance per id.
#[derive(Debug, Default)]
pub struct ProcessManager {
    processes: RwLock<HashMap<String, Arc<ManagedProcess>>>,
    options: SupervisorOptions,
}

impl ProcessManager {
    /// Manager launching processes with `options`.
    #[must_use]
    pub fn new(options: SupervisorOptions) -> Self {
        Self {
            processes: RwLock::new(HashMap::new()),
            options,
        }
    }

    /// Launch `spec` under `id`.
    ///
    /// A terminal instance with the same id is replaced by the new lifecycle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyExists` if a non-terminal instance holds
    /// `id` (nothing is launched), or `AppError::Spawn` if the launch fails
    /// (nothing is recorded).
    pub fn start(
        &self,
        id: &str,
        spec: &ServiceSpec,
        log: Option<&LogRun>,
    ) -> Result<Arc<ManagedProcess>> {
        let mut processes = self
            .processes
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = processes.get(id) {
            if !existing.state().is_terminal() {
                return Err(AppError::AlreadyExists(format!(
                    "process {id} is already {}",
                    existing.state().as_str()
                )));
            }
        }

        let process = ManagedProcess::spawn(id, spec, log, self.options.clone())?;
        processes.insert(id.to_owned(), Arc::clone(&process));
        Ok(process)
    }

    /// Instance registered under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<ManagedProcess>> {
        self.read().get(id).cloned()
    }

    /// `(id, state)` for every instance, sorted by id.
    #[must_use]
    pub fn list(&self) -> Vec<(String, ProcessState)> {
        let mut rows: Vec<_> = self
            .read()
            .iter()
            .map(|(id, process)| (id.clone(), process.state()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Stop the instance under `id`. The entry is kept so its final state
    /// and output stay observable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no instance has that id.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let process = self
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("no process {id}")))?;
        process.stop().await;
        Ok(())
    }

    /// Stop every instance concurrently.
    pub async fn stop_all(&self) {
        let processes: Vec<_> = self.read().values().cloned().collect();
        if processes.is_empty() {
            return;
        }
        info!(count = processes.len(), "stopping all processes");
        join_all(processes.iter().map(|process| process.stop())).await;
    }

    /// Forget the instance under `id` without stopping it.
    pub fn remove(&self, id: &str) -> Option<Arc<ManagedProcess>> {
        self.processes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ManagedProcess>>> {
        self.processes.read().unwrap_or_else(PoisonError::into_inner)
    }
}
