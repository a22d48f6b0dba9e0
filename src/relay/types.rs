//! HTTP request and response types.

use serde::{Deserialize, Serialize};

/// WebSocket path for the host role.
pub const HOST_PATH: &str = "/ws/host";
/// WebSocket path for the client role.
pub const CLIENT_PATH: &str = "/ws/client";

/// Request to register (or refresh) a host identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterHostRequest {
    /// Requested host id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Response for host registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterHostResponse {
    pub host_id: String,
    pub websocket_host_path: String,
    pub websocket_client_path: String,
}

impl RegisterHostResponse {
    pub fn new(host_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            websocket_host_path: HOST_PATH.to_string(),
            websocket_client_path: CLIENT_PATH.to_string(),
        }
    }
}

/// Response for host status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStatusResponse {
    pub host_id: String,
    pub username: String,
    pub host_online: bool,
    pub client_connected: bool,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    /// Number of registered host identities.
    pub hosts: usize,
}

/// Query parameters of a WebSocket upgrade.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Generic API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "HOST_NOT_FOUND").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn host_not_found(id: &str) -> Self {
        Self::new("HOST_NOT_FOUND", format!("Host '{}' not found", id))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_camel_case() {
        let json = r#"{"hostId": "h1", "username": "u", "password": "p"}"#;
        let req: RegisterHostRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.host_id.as_deref(), Some("h1"));
        assert_eq!(req.username, "u");
    }

    #[test]
    fn test_register_request_missing_fields() {
        let req: RegisterHostRequest = serde_json::from_str("{}").unwrap();
        assert!(req.host_id.is_none());
        assert!(req.username.is_empty());
        assert!(req.password.is_empty());
    }

    #[test]
    fn test_register_response_paths() {
        let json = serde_json::to_string(&RegisterHostResponse::new("h1")).unwrap();
        assert!(json.contains(r#""hostId":"h1""#));
        assert!(json.contains(r#""websocketHostPath":"/ws/host""#));
        assert!(json.contains(r#""websocketClientPath":"/ws/client""#));
    }

    #[test]
    fn test_status_response_shape() {
        let status = HostStatusResponse {
            host_id: "h1".into(),
            username: "u".into(),
            host_online: true,
            client_connected: false,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains(r#""hostOnline":true"#));
        assert!(json.contains(r#""clientConnected":false"#));
    }

    #[test]
    fn test_error_response_serialization() {
        let err = ErrorResponse::host_not_found("h9");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("HOST_NOT_FOUND"));
        assert!(json.contains("h9"));
    }
}
