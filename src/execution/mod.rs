//! One-shot command execution.
//!
//! This module provides:
//! - Process-per-command execution with streamed stdout/stderr
//! - Cancellation with a graceful signal and a forced kill after a grace window
//! - Exit code mapping
//!
//! # Example
//!
//! ```no_run
//! use shell_relay::execution::{ProcessSupervisor, RequestKey};
//! use shell_relay::shell;
//!
//! # async fn run() -> shell_relay::Result<()> {
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let supervisor = ProcessSupervisor::new(".", shell::resolve(None), tx);
//! supervisor.execute(RequestKey::new(None, "r1"), "echo hello")?;
//! while let Some(event) = rx.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

mod result;
mod supervisor;

pub use result::{exit_code_from_status, OutputStream, EXIT_POLICY_REJECTED, EXIT_SPAWN_FAILED};
pub use supervisor::{ProcessSupervisor, RequestKey, DEFAULT_GRACE};
