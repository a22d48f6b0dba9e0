//! The relay server.
//!
//! Hosts and clients never talk to each other directly; both keep one
//! WebSocket to the relay, which authenticates them and forwards frames.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check with host count
//! - `POST /api/register-host` - Register or refresh a host identity
//! - `GET /api/hosts/{host_id}` - Host status
//! - `WS /ws/host` - Host connection (`?hostId=&username=&password=`)
//! - `WS /ws/client` - Client connection (same query)
//!
//! Credentials travel in the query string in cleartext; put the relay behind
//! TLS.
//!
//! ## Example
//!
//! ```no_run
//! use shell_relay::relay::{serve, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> shell_relay::Result<()> {
//!     let config = ServerConfig::new("127.0.0.1", 8080);
//!     serve(config, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```

pub mod handlers;
pub mod liveness;
pub mod registry;
pub mod router;
pub mod types;
pub mod websocket;

pub use handlers::AppState;
pub use liveness::{LivenessMonitor, SweepStats};
pub use registry::{ConnectionHandle, HostIdentity, HostRegistry, HostSession, Outbound};
pub use router::{create_router, create_router_with_state, serve, serve_on, ServerConfig};
pub use types::{
    ConnectParams, ErrorResponse, HealthResponse, HostStatusResponse, RegisterHostRequest,
    RegisterHostResponse, CLIENT_PATH, HOST_PATH,
};
