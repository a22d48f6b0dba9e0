//! # shell-relay
//!
//! Relay-brokered remote shell.
//!
//! A host machine keeps one outbound WebSocket to a relay; remote clients
//! connect to the same relay and name the host by id and credentials. The
//! relay forwards frames between them without interpreting them, so neither
//! side needs an inbound port.
//!
//! ## Features
//!
//! - **Two protocol families**: interactive PTY shells per client, or one
//!   process per command with separate stdout/stderr streams
//! - **Command policy**: allow-list, working-directory confinement and
//!   warnings for chaining syntax, applied before anything is spawned
//! - **Cross-platform PTY**: Windows ConPTY and Unix PTY via portable-pty
//! - **Liveness**: the relay pings every connection and drops silent ones
//!
//! ## Quick Start
//!
//! ```no_run
//! use shell_relay::endpoint::Credentials;
//! use shell_relay::host::{self, AgentConfig};
//! use shell_relay::security::{CommandPolicy, PolicyConfig};
//! use shell_relay::{shell, ProtocolFamily};
//!
//! #[tokio::main]
//! async fn main() -> shell_relay::Result<()> {
//!     shell_relay::logging::try_init().ok();
//!
//!     let config = AgentConfig::new(
//!         "http://127.0.0.1:8080",
//!         Credentials::new("build-box", "alice", "s3cret"),
//!     )
//!     .with_register(true);
//!
//!     host::run(
//!         config,
//!         ProtocolFamily::Oneshot,
//!         CommandPolicy::new(PolicyConfig::default().strict(true)),
//!         shell::resolve(None),
//!     )
//!     .await
//! }
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod execution;
pub mod host;
pub mod logging;
pub mod output;
pub mod protocol;
pub mod pty;
pub mod relay;
pub mod security;
pub mod shell;

// Re-export commonly used types
pub use error::{RelayError, Result};
pub use execution::ProcessSupervisor;
pub use host::HostSessionManager;
pub use protocol::{ClientEvent, ClientId, ClientRequest, HostCommand, HostEvent, ProtocolFamily};
pub use pty::{PtyMultiplexer, PtySize};
pub use relay::{HostRegistry, LivenessMonitor, ServerConfig};
pub use security::{CommandPolicy, PolicyConfig, Verdict};
