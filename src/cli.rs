//! Command-line interface for shell-relay.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::protocol::ProtocolFamily;

/// Which role the process runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Relay,
    Host,
    Client,
}

impl Command {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "relay" => Some(Self::Relay),
            "host" => Some(Self::Host),
            "client" => Some(Self::Client),
            _ => None,
        }
    }
}

/// Command-line arguments.
///
/// Every option is optional so that unset flags leave the config file and
/// environment values in place.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Selected subcommand.
    pub command: Option<Command>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,

    /// Relay bind address.
    pub host: Option<IpAddr>,
    /// Relay listen port.
    pub port: Option<u16>,
    /// Message family (relay family, host mode, client mode).
    pub protocol: Option<ProtocolFamily>,
    /// Seconds between liveness sweeps.
    pub heartbeat_secs: Option<u64>,

    /// Relay base URL for host and client.
    pub relay_url: Option<String>,
    pub host_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Register the host identity before connecting.
    pub register: bool,

    /// Preferred shell program.
    pub shell: Option<String>,
    /// Working directory for commands and shells.
    pub cwd: Option<PathBuf>,
    pub strict_cwd: bool,
    /// Allowed command names; repeatable and comma separated.
    pub allow: Vec<String>,
    /// Do not warn about chaining or substitution syntax.
    pub no_warn: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Short('H') | Long("host") => {
                let value: String = parser.value()?.parse()?;
                result.host = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("host", value))?,
                );
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                result.port = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("port", value))?,
                );
            }
            Short('m') | Long("protocol") | Long("mode") => {
                let value: String = parser.value()?.parse()?;
                result.protocol = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("protocol", value))?,
                );
            }
            Long("heartbeat") => {
                let value: String = parser.value()?.parse()?;
                result.heartbeat_secs = Some(
                    value
                        .parse::<u64>()
                        .ok()
                        .filter(|secs| *secs > 0)
                        .ok_or(ArgsError::InvalidValue("heartbeat", value))?,
                );
            }
            Short('r') | Long("relay") => {
                result.relay_url = Some(parser.value()?.parse()?);
            }
            Short('i') | Long("host-id") => {
                result.host_id = Some(parser.value()?.parse()?);
            }
            Short('u') | Long("username") => {
                result.username = Some(parser.value()?.parse()?);
            }
            Short('P') | Long("password") => {
                result.password = Some(parser.value()?.parse()?);
            }
            Long("register") => {
                result.register = true;
            }
            Short('s') | Long("shell") => {
                result.shell = Some(parser.value()?.parse()?);
            }
            Short('d') | Long("cwd") => {
                result.cwd = Some(parser.value()?.parse()?);
            }
            Long("strict-cwd") => {
                result.strict_cwd = true;
            }
            Short('a') | Long("allow") => {
                let value: String = parser.value()?.parse()?;
                result.allow.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from),
                );
            }
            Long("no-warn") => {
                result.no_warn = true;
            }
            Value(val) if result.command.is_none() => {
                let name = val.to_string_lossy();
                result.command = Some(
                    Command::parse(&name)
                        .ok_or_else(|| ArgsError::UnknownCommand(name.into_owned()))?,
                );
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"shell-relay {version}
Relay-brokered remote shell

USAGE:
    shell-relay <COMMAND> [OPTIONS]

COMMANDS:
    relay                   Run the relay server
    host                    Expose this machine's shell through a relay
    client                  Attach to a host through a relay

COMMON OPTIONS:
    -c, --config <FILE>     Path to configuration file (JSON)
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
    -m, --protocol <NAME>   Message family: interactive or oneshot [default: interactive]
    -h, --help              Print help
    -V, --version           Print version

RELAY OPTIONS:
    -H, --host <ADDR>       Address to bind [default: 127.0.0.1]
    -p, --port <PORT>       Port to listen on [default: 8080]
        --heartbeat <SECS>  Seconds between liveness pings [default: 30]

HOST / CLIENT OPTIONS:
    -r, --relay <URL>       Relay base URL (http, https, ws, wss)
    -i, --host-id <ID>      Host identity
    -u, --username <NAME>   Username of the host identity
    -P, --password <PASS>   Password of the host identity

HOST OPTIONS:
        --register          Register the identity before connecting
    -s, --shell <PROGRAM>   Preferred shell
    -d, --cwd <DIR>         Working directory [default: current directory]
        --strict-cwd        Reject commands that leave the working directory
    -a, --allow <NAMES>     Allowed command names, comma separated (repeatable)
        --no-warn           Do not warn about chaining or substitution syntax

ENVIRONMENT VARIABLES:
    SHELL_RELAY_HOST, SHELL_RELAY_PORT, SHELL_RELAY_PROTOCOL,
    SHELL_RELAY_HEARTBEAT_SECS, SHELL_RELAY_URL, SHELL_RELAY_HOST_ID,
    SHELL_RELAY_USERNAME, SHELL_RELAY_PASSWORD, SHELL_RELAY_SHELL,
    SHELL_RELAY_CWD, SHELL_RELAY_STRICT_CWD, SHELL_RELAY_ALLOW,
    SHELL_RELAY_LOG_LEVEL   Override the matching config values
    RUST_LOG                Alternative log level setting

EXAMPLES:
    # Relay on all interfaces
    shell-relay relay -H 0.0.0.0 -p 8080

    # Register and serve this machine's shell
    shell-relay host -r https://relay.example.com -i build-box -u alice -P s3cret --register

    # Attach to it
    shell-relay client -r https://relay.example.com -i build-box -u alice -P s3cret
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("shell-relay {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Unknown subcommand.
    UnknownCommand(String),
    /// Unexpected positional argument.
    UnexpectedArgument(String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::UnknownCommand(name) => {
                write!(f, "unknown command: '{}' (expected relay, host or client)", name)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
