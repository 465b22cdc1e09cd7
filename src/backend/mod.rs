//! Pluggable session backends.
//!
//! A [`SessionBackend`] is "a place a service runs and can be observed and
//! controlled". [`wezterm::WeztermBackend`] drives terminal multiplexer panes
//! through the `wezterm cli`; [`process::ProcessBackend`] supervises raw child
//! processes directly. The orchestrator and control plane depend only on the
//! trait.

pub mod process;
pub mod runner;
pub mod wezterm;

use std::future::Future;
use std::pin::Pin;

use crate::models::service::{BackendKind, ServiceHandle, ServiceSpec, SessionInfo};
use crate::Result;

pub use process::ProcessBackend;
pub use runner::{CliOutput, CliRunner, SystemCliRunner};
pub use wezterm::{WeztermBackend, WeztermOptions};

/// Boxed future returned by the object-safe backend traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Capability interface shared by every backend.
pub trait SessionBackend: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> BackendKind;

    /// Adopt an already-running session created by another invocation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` if there is nothing to attach to.
    fn attach(&self) -> BoxFuture<'_, ()>;

    /// Spawn one service and return its handle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` once the backend gives up on the launch.
    fn spawn<'a>(&'a self, spec: &'a ServiceSpec) -> BoxFuture<'a, ServiceHandle>;

    /// Live sessions in display order, queried fresh from the backend.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` if the backend cannot be queried.
    fn list(&self) -> BoxFuture<'_, Vec<SessionInfo>>;

    /// Deliver `text` followed by a newline to a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` or `AppError::NotRunning` on failure.
    fn send_text<'a>(&'a self, handle_id: &'a str, text: &'a str) -> BoxFuture<'a, ()>;

    /// Last `lines` lines of live output.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` or `AppError::NotFound` on failure.
    fn read_output<'a>(&'a self, handle_id: &'a str, lines: usize) -> BoxFuture<'a, String>;

    /// Bring a session to the foreground.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unsupported` where there is no foreground.
    fn focus<'a>(&'a self, handle_id: &'a str) -> BoxFuture<'a, ()>;

    /// Terminate a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` if the backend rejects the kill.
    fn kill<'a>(&'a self, handle_id: &'a str) -> BoxFuture<'a, ()>;

    /// Handle ids spawned by this instance, in spawn order.
    fn spawned_handles(&self) -> Vec<String>;

    /// Release everything this backend still owns.
    ///
    /// # Errors
    ///
    /// Implementations are best-effort and normally return `Ok`.
    fn cleanup(&self) -> BoxFuture<'_, ()>;
}
