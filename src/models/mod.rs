//! Domain models shared by the backends, supervisor, and control plane.

pub mod dependency;
pub mod process;
pub mod service;
