//! Configuration management for shell-relay.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::client::ClientConfig;
use crate::endpoint::Credentials;
use crate::host::AgentConfig;
use crate::protocol::{ProtocolFamily, MAX_FRAME_BYTES};
use crate::relay::ServerConfig;
use crate::security::{CommandPolicy, PolicyConfig};
use crate::shell::{self, ShellCandidate};

/// Prefix of every environment variable the config reads.
pub const ENV_PREFIX: &str = "SHELL_RELAY_";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relay server settings.
    pub relay: RelaySection,
    /// Host agent settings.
    pub host: HostSection,
    /// Client settings.
    pub client: ClientSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Relay server section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Message family the relay forwards.
    pub protocol: ProtocolFamily,
    /// Seconds between liveness sweeps.
    pub heartbeat_secs: u64,
    /// Largest frame accepted or forwarded.
    pub max_frame_bytes: usize,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            protocol: ProtocolFamily::default(),
            heartbeat_secs: 30,
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

/// Host agent section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSection {
    pub relay_url: String,
    pub host_id: String,
    pub username: String,
    pub password: String,
    /// Preferred shell; platform defaults follow it.
    pub shell: Option<String>,
    /// Working directory; the current directory when unset.
    pub cwd: Option<PathBuf>,
    pub strict_cwd: bool,
    /// Allowed command names; empty allows everything.
    pub allow: Vec<String>,
    pub warn_on_dangerous_syntax: bool,
    /// Must match the relay's protocol.
    pub mode: ProtocolFamily,
    /// Register the identity over HTTP before connecting.
    pub register: bool,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            relay_url: String::new(),
            host_id: String::new(),
            username: String::new(),
            password: String::new(),
            shell: None,
            cwd: None,
            strict_cwd: false,
            allow: Vec::new(),
            warn_on_dangerous_syntax: true,
            mode: ProtocolFamily::default(),
            register: false,
        }
    }
}

/// Client section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub relay_url: String,
    pub host_id: String,
    pub username: String,
    pub password: String,
    pub mode: ProtocolFamily,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn require(value: &str, name: &'static str) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(name))
    } else {
        Ok(value.to_string())
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from a variable lookup (for testing).
    ///
    /// `lookup` receives full variable names such as `SHELL_RELAY_PORT`.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        if let Some(host) = var("HOST") {
            self.relay.host = host;
        }
        if let Some(port) = var("PORT").and_then(|p| p.parse().ok()) {
            self.relay.port = port;
        }
        if let Some(family) = var("PROTOCOL").and_then(|p| p.parse().ok()) {
            self.set_protocol(family);
        }
        if let Some(secs) = var("HEARTBEAT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
        {
            self.relay.heartbeat_secs = secs;
        }

        if let Some(url) = var("URL") {
            self.host.relay_url = url.clone();
            self.client.relay_url = url;
        }
        if let Some(id) = var("HOST_ID") {
            self.host.host_id = id.clone();
            self.client.host_id = id;
        }
        if let Some(username) = var("USERNAME") {
            self.host.username = username.clone();
            self.client.username = username;
        }
        if let Some(password) = var("PASSWORD") {
            self.host.password = password.clone();
            self.client.password = password;
        }

        if let Some(shell) = var("SHELL").filter(|s| !s.is_empty()) {
            self.host.shell = Some(shell);
        }
        if let Some(cwd) = var("CWD").filter(|s| !s.is_empty()) {
            self.host.cwd = Some(PathBuf::from(cwd));
        }
        if let Some(strict) = var("STRICT_CWD").as_deref().and_then(parse_bool) {
            self.host.strict_cwd = strict;
        }
        if let Some(allow) = var("ALLOW") {
            self.host.allow = allow
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.relay.host = host.to_string();
        }
        if let Some(port) = args.port {
            self.relay.port = port;
        }
        if let Some(family) = args.protocol {
            self.set_protocol(family);
        }
        if let Some(secs) = args.heartbeat_secs {
            self.relay.heartbeat_secs = secs;
        }

        if let Some(ref url) = args.relay_url {
            self.host.relay_url = url.clone();
            self.client.relay_url = url.clone();
        }
        if let Some(ref id) = args.host_id {
            self.host.host_id = id.clone();
            self.client.host_id = id.clone();
        }
        if let Some(ref username) = args.username {
            self.host.username = username.clone();
            self.client.username = username.clone();
        }
        if let Some(ref password) = args.password {
            self.host.password = password.clone();
            self.client.password = password.clone();
        }
        if args.register {
            self.host.register = true;
        }

        if let Some(ref shell) = args.shell {
            self.host.shell = Some(shell.clone());
        }
        if let Some(ref cwd) = args.cwd {
            self.host.cwd = Some(cwd.clone());
        }
        if args.strict_cwd {
            self.host.strict_cwd = true;
        }
        if !args.allow.is_empty() {
            self.host.allow = args.allow.clone();
        }
        if args.no_warn {
            self.host.warn_on_dangerous_syntax = false;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(ref path) = args.config {
            config = Config::from_file(path)?;
        }

        config.apply_env();
        config.apply_args(args);

        Ok(config)
    }

    /// One family for the whole deployment: relay, host and client agree.
    fn set_protocol(&mut self, family: ProtocolFamily) {
        self.relay.protocol = family;
        self.host.mode = family;
        self.client.mode = family;
    }

    /// Convert to ServerConfig for the relay.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .relay
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.relay.host.clone()))?;

        if self.relay.heartbeat_secs == 0 {
            return Err(ConfigError::InvalidValue("relay.heartbeat_secs", "0".into()));
        }
        if self.relay.max_frame_bytes == 0 {
            return Err(ConfigError::InvalidValue("relay.max_frame_bytes", "0".into()));
        }

        let mut server = ServerConfig::new(host.to_string(), self.relay.port);
        server.family = self.relay.protocol;
        server.heartbeat = Duration::from_secs(self.relay.heartbeat_secs);
        server.max_frame_bytes = self.relay.max_frame_bytes;
        Ok(server)
    }

    /// Connection settings for the host agent.
    pub fn to_agent_config(&self) -> Result<AgentConfig, ConfigError> {
        let relay_url = require(&self.host.relay_url, "host.relay_url")?;
        let host_id = if self.host.register {
            self.host.host_id.clone()
        } else {
            require(&self.host.host_id, "host.host_id")?
        };
        let credentials = Credentials::new(
            host_id,
            require(&self.host.username, "host.username")?,
            require(&self.host.password, "host.password")?,
        );
        let mut agent = AgentConfig::new(relay_url, credentials).with_register(self.host.register);
        agent.max_frame_bytes = self.relay.max_frame_bytes;
        Ok(agent)
    }

    /// Command policy for the host, rooted at the configured directory.
    pub fn to_policy(&self) -> Result<CommandPolicy, ConfigError> {
        let cwd = match self.host.cwd {
            Some(ref cwd) => cwd.clone(),
            None => std::env::current_dir().map_err(ConfigError::Io)?,
        };
        if !cwd.is_dir() {
            return Err(ConfigError::InvalidCwd(cwd));
        }

        let config = PolicyConfig {
            cwd,
            warn_on_dangerous_syntax: self.host.warn_on_dangerous_syntax,
            ..PolicyConfig::default()
        }
        .strict(self.host.strict_cwd)
        .with_allow_list(&self.host.allow);
        Ok(CommandPolicy::new(config))
    }

    /// Shell candidates for the host, in preference order.
    pub fn shells(&self) -> Vec<ShellCandidate> {
        shell::resolve(self.host.shell.as_deref())
    }

    /// Connection settings for the client.
    pub fn to_client_config(&self) -> Result<ClientConfig, ConfigError> {
        Ok(ClientConfig {
            relay_url: require(&self.client.relay_url, "client.relay_url")?,
            credentials: Credentials::new(
                require(&self.client.host_id, "client.host_id")?,
                require(&self.client.username, "client.username")?,
                require(&self.client.password, "client.password")?,
            ),
            mode: self.client.mode,
        })
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid host address.
    InvalidHost(String),
    /// Required setting left empty.
    Missing(&'static str),
    /// Setting outside its valid range.
    InvalidValue(&'static str, String),
    /// Working directory does not exist.
    InvalidCwd(PathBuf),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidHost(host) => write!(f, "invalid host address: {}", host),
            Self::Missing(name) => write!(f, "missing required setting: {}", name),
            Self::InvalidValue(name, value) => write!(f, "invalid value for {}: {}", name, value),
            Self::InvalidCwd(path) => {
                write!(f, "working directory does not exist: {}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.relay.host, "127.0.0.1");
        assert_eq!(config.relay.port, 8080);
        assert_eq!(config.relay.protocol, ProtocolFamily::Interactive);
        assert_eq!(config.relay.heartbeat_secs, 30);
        assert!(config.host.warn_on_dangerous_syntax);
        assert!(!config.host.strict_cwd);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "relay": { "host": "0.0.0.0", "port": 9000, "protocol": "oneshot" },
            "host": {
                "relay_url": "http://relay:9000",
                "host_id": "box",
                "allow": ["ls", "pwd"],
                "strict_cwd": true
            }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.relay.host, "0.0.0.0");
        assert_eq!(config.relay.port, 9000);
        assert_eq!(config.relay.protocol, ProtocolFamily::Oneshot);
        assert_eq!(config.relay.heartbeat_secs, 30);
        assert_eq!(config.host.allow, vec!["ls", "pwd"]);
        assert!(config.host.strict_cwd);
        assert!(config.host.warn_on_dangerous_syntax);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_from(env(&[
            ("SHELL_RELAY_PORT", "7000"),
            ("SHELL_RELAY_PROTOCOL", "oneshot"),
            ("SHELL_RELAY_URL", "ws://relay"),
            ("SHELL_RELAY_HOST_ID", "box"),
            ("SHELL_RELAY_STRICT_CWD", "yes"),
            ("SHELL_RELAY_ALLOW", "ls,,pwd "),
            ("RUST_LOG", "debug"),
        ]));

        assert_eq!(config.relay.port, 7000);
        assert_eq!(config.relay.protocol, ProtocolFamily::Oneshot);
        assert_eq!(config.host.mode, ProtocolFamily::Oneshot);
        assert_eq!(config.client.mode, ProtocolFamily::Oneshot);
        assert_eq!(config.host.relay_url, "ws://relay");
        assert_eq!(config.client.host_id, "box");
        assert!(config.host.strict_cwd);
        assert_eq!(config.host.allow, vec!["ls", "pwd"]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_env_ignores_garbage() {
        let mut config = Config::default();
        config.apply_env_from(env(&[
            ("SHELL_RELAY_PORT", "lots"),
            ("SHELL_RELAY_HEARTBEAT_SECS", "0"),
            ("SHELL_RELAY_STRICT_CWD", "maybe"),
        ]));
        assert_eq!(config.relay.port, 8080);
        assert_eq!(config.relay.heartbeat_secs, 30);
        assert!(!config.host.strict_cwd);
    }

    #[test]
    fn test_apply_args_keeps_unset_values() {
        let mut config = Config::default();
        config.relay.port = 9999;
        config.host.allow = vec!["ls".into()];

        let args = Args {
            username: Some("alice".into()),
            no_warn: true,
            ..Args::default()
        };
        config.apply_args(&args);

        assert_eq!(config.relay.port, 9999);
        assert_eq!(config.host.allow, vec!["ls"]);
        assert_eq!(config.host.username, "alice");
        assert_eq!(config.client.username, "alice");
        assert!(!config.host.warn_on_dangerous_syntax);
    }

    #[test]
    fn test_to_server_config() {
        let mut config = Config::default();
        config.relay.heartbeat_secs = 5;
        let server = config.to_server_config().unwrap();

        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 8080);
        assert_eq!(server.heartbeat, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_host() {
        let mut config = Config::default();
        config.relay.host = "not-an-ip".to_string();
        assert!(matches!(
            config.to_server_config(),
            Err(ConfigError::InvalidHost(_))
        ));
    }

    #[test]
    fn test_agent_config_requires_credentials() {
        let mut config = Config::default();
        config.host.relay_url = "http://relay".into();
        config.host.host_id = "box".into();
        config.host.username = "alice".into();

        let err = config.to_agent_config().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("host.password")));

        config.host.password = "pw".into();
        let agent = config.to_agent_config().unwrap();
        assert_eq!(agent.credentials.host_id, "box");
        assert!(!agent.register);
    }

    #[test]
    fn test_register_allows_missing_host_id() {
        let mut config = Config::default();
        config.host.relay_url = "http://relay".into();
        config.host.username = "alice".into();
        config.host.password = "pw".into();
        assert!(config.to_agent_config().is_err());

        config.host.register = true;
        let agent = config.to_agent_config().unwrap();
        assert!(agent.register);
        assert!(agent.credentials.host_id.is_empty());
    }

    #[test]
    fn test_policy_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.host.cwd = Some(dir.path().to_path_buf());
        config.host.strict_cwd = true;
        config.host.allow = vec!["LS".into()];

        let policy = config.to_policy().unwrap();
        assert!(policy.config().strict_cwd);
        assert!(policy.config().allow_list.contains("ls"));
        assert_eq!(policy.config().cwd, dir.path());
    }

    #[test]
    fn test_policy_missing_cwd() {
        let mut config = Config::default();
        config.host.cwd = Some(PathBuf::from("/definitely/not/here"));
        assert!(matches!(config.to_policy(), Err(ConfigError::InvalidCwd(_))));
    }

    #[test]
    fn test_client_config() {
        let mut config = Config::default();
        config.apply_args(&Args {
            relay_url: Some("https://relay".into()),
            host_id: Some("box".into()),
            username: Some("alice".into()),
            password: Some("pw".into()),
            protocol: Some(ProtocolFamily::Oneshot),
            ..Args::default()
        });

        let client = config.to_client_config().unwrap();
        assert_eq!(client.relay_url, "https://relay");
        assert_eq!(client.mode, ProtocolFamily::Oneshot);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"relay\""));
        assert!(json.contains("\"heartbeat_secs\""));
        assert!(json.contains("\"interactive\""));
    }
}
