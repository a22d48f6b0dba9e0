//! Error types for shell-relay.

use thiserror::Error;

/// Main error type for shell-relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Unknown host id or wrong username/password.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Registration request without username or password.
    #[error("username and password are required")]
    MissingCredentials,

    /// Host id already registered under another username.
    #[error("host id {0} is registered to a different user")]
    CredentialConflict(String),

    /// Host id is not registered.
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// A client tried to attach while no host connection is live.
    #[error("host offline")]
    HostOffline,

    /// A client message arrived while no host connection is live.
    #[error("host disconnected")]
    HostDisconnected,

    /// Frame type not allowed for the sender's role, or unparseable frame.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// No shell candidate could be spawned.
    #[error("failed to spawn: {0}")]
    SpawnFailed(String),

    /// PTY-related error.
    #[error("PTY error: {0}")]
    Pty(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid relay URL.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Relay URL with a scheme other than http(s) or ws(s).
    #[error("unsupported relay url scheme: {0}")]
    UnsupportedScheme(String),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,
}

impl RelayError {
    /// Whether the error ends the connection attempt for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AuthFailed(_) | Self::HostOffline)
    }
}

/// Convenience Result type for shell-relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
