//! Relay endpoint URLs as seen from hosts and clients.

use url::Url;

use crate::error::RelayError;
use crate::Result;

/// Credentials naming one host identity on the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub host_id: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(
        host_id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host_id: host_id.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

fn parse(base: &str) -> Result<Url> {
    let url = Url::parse(base)?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(url),
        other => Err(RelayError::UnsupportedScheme(other.to_string())),
    }
}

fn with_scheme(mut url: Url, scheme: &str) -> Result<Url> {
    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|_| RelayError::UnsupportedScheme(url.scheme().to_string()))?;
    }
    Ok(url)
}

fn append_path(url: &mut Url, path: &str) {
    let prefix = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{}{}", prefix, path));
}

/// HTTP(S) form of a relay URL given as http, https, ws or wss.
pub fn http_base(base: &str) -> Result<Url> {
    let url = parse(base)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "https",
        _ => "http",
    };
    with_scheme(url, scheme)
}

/// URL of one of the relay's REST endpoints.
pub fn api_url(base: &str, path: &str) -> Result<Url> {
    let mut url = http_base(base)?;
    append_path(&mut url, path);
    url.set_query(None);
    Ok(url)
}

/// WebSocket URL for `path` carrying the credentials as query parameters.
pub fn websocket_url(base: &str, path: &str, credentials: &Credentials) -> Result<Url> {
    let url = parse(base)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    let mut url = with_scheme(url, scheme)?;
    append_path(&mut url, path);
    url.query_pairs_mut()
        .clear()
        .append_pair("hostId", &credentials.host_id)
        .append_pair("username", &credentials.username)
        .append_pair("password", &credentials.password);
    Ok(url)
}
