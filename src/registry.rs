//! Service name to backend handle mapping, and caller reference resolution.
//!
//! The registry is a cache. Anything that addresses a session resolves
//! against a fresh backend listing via [`resolve_reference`], and
//! [`SessionRegistry::reconcile`] drops entries the backend no longer reports.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::models::service::{ServiceHandle, SessionInfo};
use crate::{AppError, Result};

/// In-memory registry; at most one handle per service name.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    handles: RwLock<HashMap<String, ServiceHandle>>,
}

impl SessionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `handle`, returning the handle it replaced.
    pub fn register(&self, handle: ServiceHandle) -> Option<ServiceHandle> {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.name.clone(), handle)
    }

    /// Forget `name`.
    pub fn remove(&self, name: &str) -> Option<ServiceHandle> {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Handle registered for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ServiceHandle> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Copy of every handle, sorted by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ServiceHandle> {
        let mut handles: Vec<ServiceHandle> = self
            .handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        handles
    }

    /// Drop entries whose handle id is absent from `live`. Returns the names
    /// dropped.
    pub fn reconcile(&self, live: &[SessionInfo]) -> Vec<String> {
        let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
        let mut dropped: Vec<String> = handles
            .values()
            .filter(|handle| !live.iter().any(|s| s.handle_id == handle.handle_id))
            .map(|handle| handle.name.clone())
            .collect();
        for name in &dropped {
            handles.remove(name);
            debug!(service = %name, "registry entry no longer live");
        }
        dropped.sort();
        dropped
    }
}

/// Resolve a caller reference against a live listing.
///
/// Tried in order: a 1-based index, a case-insensitive exact name, then the
/// first name containing the reference case-insensitively.
///
/// # Errors
///
/// Returns `AppError::NotFound` enumerating the live names when nothing
/// matches.
pub fn resolve_reference(reference: &str, live: &[SessionInfo]) -> Result<SessionInfo> {
    let reference = reference.trim();

    if let Ok(index) = reference.parse::<usize>() {
        if let Some(session) = index.checked_sub(1).and_then(|i| live.get(i)) {
            return Ok(session.clone());
        }
    }

    let needle = reference.to_lowercase();
    if !needle.is_empty() {
        if let Some(session) = live.iter().find(|s| s.name.to_lowercase() == needle) {
            return Ok(session.clone());
        }
        if let Some(session) = live.iter().find(|s| s.name.to_lowercase().contains(&needle)) {
            return Ok(session.clone());
        }
    }

    Err(AppError::NotFound(format!(
        "no session matches {reference:?}; available: {}",
        describe(live)
    )))
}

/// `1. name, 2. name, …`, or `(none)`.
#[must_use]
pub fn describe(live: &[SessionInfo]) -> String {
    if live.is_empty() {
        return "(none)".to_owned();
    }
    live.iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s.name))
        .collect::<Vec<_>>()
        .join(", ")
}
