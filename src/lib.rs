#![forbid(unsafe_code)]

//! `devtabs`: local multi-service orchestrator.
//!
//! Services run as terminal multiplexer tabs or as supervised child
//! processes, behind a dependency gate, with rotating on-disk logs and an HTTP
//! control plane that an agent bridge can drive over MCP.

pub mod backend;
pub mod bridge;
pub mod config;
pub mod control;
pub mod errors;
pub mod gate;
pub mod logstore;
pub mod models;
pub mod orchestrator;
pub mod pipe;
pub mod registry;
pub mod roster;
pub mod supervisor;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
