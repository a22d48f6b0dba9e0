//! Relay router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{any, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{get_host, health, register_host, AppState};
use super::liveness::{LivenessMonitor, DEFAULT_INTERVAL};
use super::registry::HostRegistry;
use super::types::{CLIENT_PATH, HOST_PATH};
use super::websocket::{client_ws_handler, host_ws_handler};
use crate::error::RelayError;
use crate::protocol::{ProtocolFamily, MAX_FRAME_BYTES};

/// Create the relay router with a fresh registry.
pub fn create_router(family: ProtocolFamily) -> Router {
    create_router_with_state(AppState::new(family))
}

/// Create the relay router with custom state.
pub fn create_router_with_state(state: AppState) -> Router {
    let api = Router::new()
        .route("/register-host", post(register_host))
        .route("/hosts/{host_id}", get(get_host));

    Router::new()
        .route("/health", get(health))
        .route(HOST_PATH, any(host_ws_handler))
        .route(CLIENT_PATH, any(client_ws_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Message family this relay forwards.
    pub family: ProtocolFamily,
    /// Time between liveness sweeps.
    pub heartbeat: Duration,
    /// Largest frame accepted or forwarded.
    pub max_frame_bytes: usize,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            family: ProtocolFamily::default(),
            heartbeat: DEFAULT_INTERVAL,
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

/// Start the relay server and run until the listener fails or `shutdown`
/// resolves.
pub async fn serve<F>(config: ServerConfig, shutdown: F) -> crate::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(RelayError::Io)?;
    serve_on(listener, config, shutdown).await
}

/// Run the relay on an already bound listener.
pub async fn serve_on<F>(
    listener: tokio::net::TcpListener,
    config: ServerConfig,
    shutdown: F,
) -> crate::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let registry = Arc::new(HostRegistry::with_max_frame_bytes(
        config.family,
        config.max_frame_bytes,
    ));
    let router = create_router_with_state(AppState::with_registry(Arc::clone(&registry)));
    let liveness = LivenessMonitor::new(registry, config.heartbeat).spawn();

    tracing::info!(
        addr = %listener.local_addr().map_err(RelayError::Io)?,
        family = %config.family,
        "relay listening"
    );

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(RelayError::Io);

    liveness.abort();
    result
}
