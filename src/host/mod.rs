//! Host side of the relay.
//!
//! [`HostSessionManager`] turns relay frames into process and PTY actions;
//! [`agent`] owns the WebSocket connection that feeds it.

pub mod agent;
mod manager;

pub use agent::{register, run, run_until, AgentConfig};
pub use manager::HostSessionManager;
