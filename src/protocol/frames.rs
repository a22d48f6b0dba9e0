//! Wire frames exchanged between clients, the relay and the host.
//!
//! Every frame is one JSON object with a `type` tag. Each direction has its
//! own closed enum so that a role can only produce what it is allowed to send.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::id::{generate_request_id, ClientId};
use crate::error::RelayError;
use crate::Result;

/// Largest frame the relay accepts or emits.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Message family active for a deployment.
///
/// The relay enforces exactly one family; clients and hosts of the other
/// family get an `error` reply for every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    /// Long-lived PTY shell per client: `input`/`resize` in, `output`/`exit` out.
    #[default]
    Interactive,
    /// Process per command: `command`/`cancel` in, `stdout`/`stderr`/`exit` out.
    Oneshot,
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interactive => write!(f, "interactive"),
            Self::Oneshot => write!(f, "oneshot"),
        }
    }
}

impl FromStr for ProtocolFamily {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "interactive" | "pty" => Ok(Self::Interactive),
            "oneshot" | "one-shot" | "command" => Ok(Self::Oneshot),
            other => Err(RelayError::ProtocolViolation(format!(
                "unknown protocol family: {}",
                other
            ))),
        }
    }
}

/// Frame sent by a client connection to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Raw keystrokes for the interactive shell.
    Input { data: String },
    /// Terminal size change.
    Resize { cols: u16, rows: u16 },
    /// One-shot command.
    Command {
        command: String,
        #[serde(
            default,
            rename = "requestId",
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<String>,
    },
    /// Cancel a running one-shot command.
    Cancel {
        #[serde(rename = "requestId")]
        request_id: String,
    },
}

impl ClientRequest {
    /// Family this frame belongs to.
    pub fn family(&self) -> ProtocolFamily {
        match self {
            Self::Input { .. } | Self::Resize { .. } => ProtocolFamily::Interactive,
            Self::Command { .. } | Self::Cancel { .. } => ProtocolFamily::Oneshot,
        }
    }

    /// Wire name of the frame type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input",
            Self::Resize { .. } => "resize",
            Self::Command { .. } => "command",
            Self::Cancel { .. } => "cancel",
        }
    }

    /// Attach routing metadata for delivery to the host.
    ///
    /// A `command` without a request id gets one generated here.
    pub fn annotate(self, client_id: ClientId) -> HostCommand {
        match self {
            Self::Input { data } => HostCommand::Input { client_id, data },
            Self::Resize { cols, rows } => HostCommand::Resize {
                client_id,
                cols,
                rows,
            },
            Self::Command {
                command,
                request_id,
            } => HostCommand::Command {
                client_id,
                command,
                request_id: request_id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(generate_request_id),
            },
            Self::Cancel { request_id } => HostCommand::Cancel {
                client_id,
                request_id,
            },
        }
    }
}

/// Frame delivered by the relay to the host connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostCommand {
    Input {
        #[serde(rename = "clientId")]
        client_id: ClientId,
        data: String,
    },
    Resize {
        #[serde(rename = "clientId")]
        client_id: ClientId,
        cols: u16,
        rows: u16,
    },
    Command {
        #[serde(rename = "clientId")]
        client_id: ClientId,
        command: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    Cancel {
        #[serde(rename = "clientId")]
        client_id: ClientId,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    /// Relay notice (client connected/disconnected, superseded, ...).
    System {
        #[serde(
            default,
            rename = "clientId",
            skip_serializing_if = "Option::is_none"
        )]
        client_id: Option<ClientId>,
        message: String,
    },
    /// Relay-side rejection of something the host sent.
    Error { message: String },
}

/// Frame sent by the host connection to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// Interactive shell output.
    Output {
        #[serde(
            default,
            rename = "clientId",
            skip_serializing_if = "Option::is_none"
        )]
        client_id: Option<ClientId>,
        data: String,
    },
    Stdout {
        #[serde(
            default,
            rename = "clientId",
            skip_serializing_if = "Option::is_none"
        )]
        client_id: Option<ClientId>,
        #[serde(rename = "requestId")]
        request_id: String,
        data: String,
    },
    Stderr {
        #[serde(
            default,
            rename = "clientId",
            skip_serializing_if = "Option::is_none"
        )]
        client_id: Option<ClientId>,
        #[serde(rename = "requestId")]
        request_id: String,
        data: String,
    },
    /// Process exit; `requestId` is present for one-shot commands only.
    Exit {
        #[serde(
            default,
            rename = "clientId",
            skip_serializing_if = "Option::is_none"
        )]
        client_id: Option<ClientId>,
        #[serde(
            default,
            rename = "requestId",
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<String>,
        code: i32,
    },
    System {
        #[serde(
            default,
            rename = "clientId",
            skip_serializing_if = "Option::is_none"
        )]
        client_id: Option<ClientId>,
        message: String,
    },
}

impl HostEvent {
    /// Target client, if the event is tagged.
    pub fn client_id(&self) -> Option<ClientId> {
        match self {
            Self::Output { client_id, .. }
            | Self::Stdout { client_id, .. }
            | Self::Stderr { client_id, .. }
            | Self::Exit { client_id, .. }
            | Self::System { client_id, .. } => *client_id,
        }
    }

    /// Whether the frame may be sent under the given family.
    pub fn permitted(&self, family: ProtocolFamily) -> bool {
        match self {
            Self::Exit { .. } | Self::System { .. } => true,
            Self::Output { .. } => family == ProtocolFamily::Interactive,
            Self::Stdout { .. } | Self::Stderr { .. } => family == ProtocolFamily::Oneshot,
        }
    }

    /// Wire name of the frame type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Output { .. } => "output",
            Self::Stdout { .. } => "stdout",
            Self::Stderr { .. } => "stderr",
            Self::Exit { .. } => "exit",
            Self::System { .. } => "system",
        }
    }

    pub fn system(client_id: Option<ClientId>, message: impl Into<String>) -> Self {
        Self::System {
            client_id,
            message: message.into(),
        }
    }
}

/// Frame delivered by the relay to a client connection.
///
/// Host events are forwarded with the same shape, so a client can decode
/// everything it receives with this one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Output {
        #[serde(
            default,
            rename = "clientId",
            skip_serializing_if = "Option::is_none"
        )]
        client_id: Option<ClientId>,
        data: String,
    },
    Stdout {
        #[serde(
            default,
            rename = "clientId",
            skip_serializing_if = "Option::is_none"
        )]
        client_id: Option<ClientId>,
        #[serde(rename = "requestId")]
        request_id: String,
        data: String,
    },
    Stderr {
        #[serde(
            default,
            rename = "clientId",
            skip_serializing_if = "Option::is_none"
        )]
        client_id: Option<ClientId>,
        #[serde(rename = "requestId")]
        request_id: String,
        data: String,
    },
    Exit {
        #[serde(
            default,
            rename = "clientId",
            skip_serializing_if = "Option::is_none"
        )]
        client_id: Option<ClientId>,
        #[serde(
            default,
            rename = "requestId",
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<String>,
        code: i32,
    },
    System {
        #[serde(
            default,
            rename = "clientId",
            skip_serializing_if = "Option::is_none"
        )]
        client_id: Option<ClientId>,
        message: String,
    },
    Error { message: String },
}

impl ClientEvent {
    pub fn system(client_id: Option<ClientId>, message: impl Into<String>) -> Self {
        Self::System {
            client_id,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

impl From<HostEvent> for ClientEvent {
    fn from(event: HostEvent) -> Self {
        match event {
            HostEvent::Output { client_id, data } => Self::Output { client_id, data },
            HostEvent::Stdout {
                client_id,
                request_id,
                data,
            } => Self::Stdout {
                client_id,
                request_id,
                data,
            },
            HostEvent::Stderr {
                client_id,
                request_id,
                data,
            } => Self::Stderr {
                client_id,
                request_id,
                data,
            },
            HostEvent::Exit {
                client_id,
                request_id,
                code,
            } => Self::Exit {
                client_id,
                request_id,
                code,
            },
            HostEvent::System { client_id, message } => Self::System { client_id, message },
        }
    }
}

/// Decode one text frame, mapping failures to a protocol violation.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| RelayError::ProtocolViolation(e.to_string()))
}

/// Encode one frame as JSON text.
pub fn encode<T: Serialize>(frame: &T) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}
