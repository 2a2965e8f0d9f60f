//! LM Studio backend client for the bridge
//!
//! This crate performs the outbound side of every bridge operation: HTTP
//! calls against the daemon's `api/v0` endpoints, `lms` CLI invocations, and
//! removal of model directories from the local store. It knows nothing about
//! the message bus; the worker's dispatch layer drives it through the
//! [`ModelBackend`] trait.

#![deny(clippy::all, clippy::pedantic, clippy::nursery, dead_code)]

pub mod cli;
pub mod client;
pub mod error;

pub use cli::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use client::{ApiResponse, LmStudioClient, LmStudioConfig, ModelBackend, ModelInfo};
pub use error::{LmStudioError, LmStudioResult};
