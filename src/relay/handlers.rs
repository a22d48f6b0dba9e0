//! REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::registry::HostRegistry;
use super::types::{
    ErrorResponse, HealthResponse, HostStatusResponse, RegisterHostRequest, RegisterHostResponse,
};
use crate::error::RelayError;
use crate::protocol::ProtocolFamily;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<HostRegistry>,
}

impl AppState {
    pub fn new(family: ProtocolFamily) -> Self {
        Self::with_registry(Arc::new(HostRegistry::new(family)))
    }

    pub fn with_registry(registry: Arc<HostRegistry>) -> Self {
        Self { registry }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(ProtocolFamily::default())
    }
}

fn api_error(err: RelayError) -> ApiError {
    match err {
        RelayError::MissingCredentials => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request(err.to_string())),
        ),
        RelayError::CredentialConflict(_) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::conflict(err.to_string())),
        ),
        RelayError::HostNotFound(ref id) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::host_not_found(id)),
        ),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::internal_error(other.to_string())),
        ),
    }
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let hosts = state.registry.host_count().map_err(api_error)?;
    Ok(Json(HealthResponse { ok: true, hosts }))
}

/// Register a host identity.
pub async fn register_host(
    State(state): State<AppState>,
    Json(req): Json<RegisterHostRequest>,
) -> Result<Json<RegisterHostResponse>, ApiError> {
    let host_id = state.registry.register(req).map_err(api_error)?;
    Ok(Json(RegisterHostResponse::new(host_id)))
}

/// Get host status.
pub async fn get_host(
    State(state): State<AppState>,
    Path(host_id): Path<String>,
) -> Result<Json<HostStatusResponse>, ApiError> {
    state.registry.status(&host_id).map(Json).map_err(api_error)
}
