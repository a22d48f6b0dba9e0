//! CLI integration tests.
//!
//! These tests verify the CLI argument parsing and configuration loading.

use std::ffi::OsString;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

use shell_relay::cli::{parse_args_from, Args, Command};
use shell_relay::config::Config;
use shell_relay::{ProtocolFamily, Verdict};

fn args(args: &[&str]) -> Vec<OsString> {
    std::iter::once("shell-relay")
        .chain(args.iter().copied())
        .map(OsString::from)
        .collect()
}

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

// ============================================================================
// CLI Argument Tests
// ============================================================================

#[test]
fn test_cli_defaults() {
    let result = parse_args_from(args(&[])).unwrap();

    assert!(result.command.is_none());
    assert!(result.config.is_none());
    assert!(result.relay_url.is_none());
    assert!(result.allow.is_empty());
    assert!(!result.strict_cwd);
}

#[test]
fn test_cli_relay_options() {
    let result = parse_args_from(args(&[
        "relay",
        "-H",
        "0.0.0.0",
        "-p",
        "8443",
        "--protocol",
        "oneshot",
        "-l",
        "debug",
    ]))
    .unwrap();

    assert_eq!(result.command, Some(Command::Relay));
    assert_eq!(result.host.unwrap().to_string(), "0.0.0.0");
    assert_eq!(result.port, Some(8443));
    assert_eq!(result.protocol, Some(ProtocolFamily::Oneshot));
    assert_eq!(result.log_level, Some("debug".to_string()));
}

#[test]
fn test_cli_client_options() {
    let result = parse_args_from(args(&[
        "client", "-r", "wss://relay", "-i", "box", "-u", "alice", "-P", "pw",
    ]))
    .unwrap();

    assert_eq!(result.command, Some(Command::Client));
    assert_eq!(result.relay_url.as_deref(), Some("wss://relay"));
    assert_eq!(result.host_id.as_deref(), Some("box"));
}

#[test]
fn test_cli_invalid_port() {
    let result = parse_args_from(args(&["relay", "-p", "not-a-number"]));
    assert!(result.is_err());
}

#[test]
fn test_cli_invalid_host() {
    let result = parse_args_from(args(&["relay", "-H", "not-an-ip"]));
    assert!(result.is_err());
}

#[test]
fn test_cli_unknown_flag() {
    let result = parse_args_from(args(&["relay", "--api-key", "x"]));
    assert!(result.is_err());
}

// ============================================================================
// Configuration Loading Tests
// ============================================================================

#[test]
fn test_config_from_json_file() {
    let file = config_file(
        r#"{
        "relay": {
            "host": "192.168.1.100",
            "port": 9000,
            "protocol": "oneshot",
            "heartbeat_secs": 15,
            "max_frame_bytes": 65536
        },
        "host": {
            "relay_url": "https://relay.example.com",
            "host_id": "build-box",
            "username": "alice",
            "password": "s3cret",
            "shell": "bash",
            "strict_cwd": true,
            "allow": ["ls", "cat"],
            "warn_on_dangerous_syntax": false,
            "mode": "oneshot",
            "register": true
        },
        "client": {
            "relay_url": "https://relay.example.com",
            "host_id": "build-box"
        },
        "logging": {
            "level": "debug"
        }
    }"#,
    );

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.relay.host, "192.168.1.100");
    assert_eq!(config.relay.port, 9000);
    assert_eq!(config.relay.protocol, ProtocolFamily::Oneshot);
    assert_eq!(config.relay.heartbeat_secs, 15);
    assert_eq!(config.relay.max_frame_bytes, 65536);
    assert_eq!(config.host.shell.as_deref(), Some("bash"));
    assert!(config.host.strict_cwd);
    assert!(!config.host.warn_on_dangerous_syntax);
    assert!(config.host.register);
    assert_eq!(config.client.host_id, "build-box");
    assert_eq!(config.client.mode, ProtocolFamily::Interactive);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_config_priority_cli_over_file() {
    let file = config_file(r#"{"relay": {"host": "10.0.0.1", "port": 5000}}"#);

    let args = Args {
        host: Some("192.168.1.1".parse().unwrap()),
        config: Some(file.path().to_path_buf()),
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();

    // CLI host wins, file port survives
    assert_eq!(config.relay.host, "192.168.1.1");
    assert_eq!(config.relay.port, 5000);
}

#[test]
fn test_config_protocol_applies_to_every_role() {
    let args = Args {
        protocol: Some(ProtocolFamily::Oneshot),
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();

    assert_eq!(config.relay.protocol, ProtocolFamily::Oneshot);
    assert_eq!(config.host.mode, ProtocolFamily::Oneshot);
    assert_eq!(config.client.mode, ProtocolFamily::Oneshot);
}

#[test]
fn test_config_to_server_config() {
    let file = config_file(r#"{"relay": {"heartbeat_secs": 5}}"#);
    let args = Args {
        host: Some("0.0.0.0".parse().unwrap()),
        port: Some(8080),
        config: Some(file.path().to_path_buf()),
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();
    let server = config.to_server_config().unwrap();

    assert_eq!(server.host, "0.0.0.0");
    assert_eq!(server.port, 8080);
    assert_eq!(server.heartbeat, Duration::from_secs(5));
}

#[test]
fn test_config_host_flow() {
    let dir = tempfile::tempdir().unwrap();
    let args = Args {
        command: Some(Command::Host),
        relay_url: Some("http://127.0.0.1:8080".into()),
        host_id: Some("box".into()),
        username: Some("alice".into()),
        password: Some("pw".into()),
        cwd: Some(dir.path().to_path_buf()),
        strict_cwd: true,
        allow: vec!["ls".into(), "pwd".into()],
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();
    let agent = config.to_agent_config().unwrap();
    let policy = config.to_policy().unwrap();

    assert_eq!(agent.relay_url, "http://127.0.0.1:8080");
    assert_eq!(agent.credentials.username, "alice");
    assert!(policy.config().strict_cwd);
    assert!(matches!(policy.evaluate("rm -rf /"), Verdict::Reject(_)));
    assert_eq!(policy.evaluate("ls"), Verdict::Accept);
}

#[test]
fn test_config_client_missing_host_id() {
    let args = Args {
        relay_url: Some("http://127.0.0.1:8080".into()),
        username: Some("alice".into()),
        password: Some("pw".into()),
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();
    let err = config.to_client_config().unwrap_err();
    assert!(err.to_string().contains("client.host_id"));
}

#[test]
fn test_config_missing_file() {
    let args = Args {
        config: Some("/definitely/not/here.json".into()),
        ..Args::default()
    };
    assert!(Config::load(&args).is_err());
}

// ============================================================================
// Configuration Serialization Tests
// ============================================================================

#[test]
fn test_config_roundtrip() {
    let original = Config::default();
    let json = serde_json::to_string(&original).unwrap();
    let loaded: Config = serde_json::from_str(&json).unwrap();

    assert_eq!(original.relay.host, loaded.relay.host);
    assert_eq!(original.relay.port, loaded.relay.port);
    assert_eq!(original.relay.protocol, loaded.relay.protocol);
}

#[test]
fn test_config_partial_deserialization() {
    let json = r#"{"relay": {"port": 9999}}"#;
    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.relay.port, 9999);
    assert_eq!(config.relay.host, "127.0.0.1");
    assert_eq!(config.relay.heartbeat_secs, 30);
    assert!(config.host.warn_on_dangerous_syntax);
}
