//! Terminal client for a relayed host shell.
//!
//! In interactive mode the local terminal is put in raw mode and bytes flow
//! straight through to the host's PTY. In one-shot mode every stdin line
//! becomes a `command` frame and the client waits for its `exit` before
//! reading the next line.

use std::io::{IsTerminal, Write};
use std::time::Duration;

use crossterm::terminal;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::endpoint::{websocket_url, Credentials};
use crate::error::RelayError;
use crate::output::Utf8ChunkDecoder;
use crate::protocol::{
    decode, encode, generate_request_id, notice, ClientEvent, ClientRequest, ProtocolFamily,
};
use crate::relay::CLIENT_PATH;
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const RESIZE_POLL: Duration = Duration::from_millis(250);

/// Connection settings for [`run`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub relay_url: String,
    pub credentials: Credentials,
    /// Must match the family the relay is configured for.
    pub mode: ProtocolFamily,
}

/// Attach to the host and run until the session ends.
///
/// Returns the exit code of the interactive shell, or of the last one-shot
/// command.
pub async fn run(config: ClientConfig) -> Result<i32> {
    let url = websocket_url(&config.relay_url, CLIENT_PATH, &config.credentials)?;
    let (socket, _) = connect_async(url.as_str()).await?;
    info!(host = %config.credentials.host_id, mode = %config.mode, "connected to relay");

    match config.mode {
        ProtocolFamily::Interactive => interactive(socket).await,
        ProtocolFamily::Oneshot => oneshot(socket).await,
    }
}

/// What the session loop does after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Continue,
    Exit(i32),
}

/// Writes relay events to the local terminal.
struct Console<O, E> {
    out: O,
    err: E,
    line_end: &'static str,
}

impl Console<std::io::Stdout, std::io::Stderr> {
    fn stdio(raw: bool) -> Self {
        Self {
            out: std::io::stdout(),
            err: std::io::stderr(),
            line_end: if raw { "\r\n" } else { "\n" },
        }
    }
}

impl<O: Write, E: Write> Console<O, E> {
    /// Render one event. `awaiting` is the request id whose `exit` ends the
    /// current one-shot command; interactive sessions pass `None`.
    fn handle(&mut self, event: ClientEvent, awaiting: Option<&str>) -> Result<Step> {
        match event {
            ClientEvent::Output { data, .. } | ClientEvent::Stdout { data, .. } => {
                self.out.write_all(data.as_bytes())?;
                self.out.flush()?;
            }
            ClientEvent::Stderr { data, .. } => {
                self.err.write_all(data.as_bytes())?;
                self.err.flush()?;
            }
            ClientEvent::Exit {
                request_id, code, ..
            } => match (awaiting, request_id.as_deref()) {
                (Some(expected), Some(id)) if expected != id => {
                    debug!(request = id, code, "exit for another request");
                }
                _ => return Ok(Step::Exit(code)),
            },
            ClientEvent::System { message, .. } => self.notice("relay", &message)?,
            ClientEvent::Error { message } => {
                if message == notice::HOST_OFFLINE {
                    return Err(RelayError::HostOffline);
                }
                self.notice("error", &message)?;
            }
        }
        Ok(Step::Continue)
    }

    fn notice(&mut self, label: &str, message: &str) -> Result<()> {
        write!(self.err, "[{}] {}{}", label, message, self.line_end)?;
        self.err.flush()?;
        Ok(())
    }
}

/// Restores cooked mode on drop.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Option<Self>> {
        if !std::io::stdin().is_terminal() {
            return Ok(None);
        }
        terminal::enable_raw_mode()?;
        Ok(Some(Self))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

async fn send<S>(sink: &mut S, frame: &ClientRequest) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    sink.send(Message::text(encode(frame)?)).await?;
    Ok(())
}

fn closed(frame: Option<CloseFrame>) -> Result<i32> {
    match frame {
        Some(frame) if frame.code == CloseCode::Policy => {
            Err(RelayError::AuthFailed(frame.reason.as_str().to_string()))
        }
        _ => Ok(0),
    }
}

async fn interactive(socket: WsStream) -> Result<i32> {
    let raw = RawModeGuard::enable()?;
    let mut console = Console::stdio(raw.is_some());
    let (mut sink, mut stream) = socket.split();

    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; 4096];
    let mut decoder = Utf8ChunkDecoder::new();
    let mut stdin_open = true;
    let mut ticker = tokio::time::interval(RESIZE_POLL);
    let mut last_size = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Ok((cols, rows)) = terminal::size() {
                    if last_size != Some((cols, rows)) {
                        last_size = Some((cols, rows));
                        send(&mut sink, &ClientRequest::Resize { cols, rows }).await?;
                    }
                }
            }
            read = stdin.read(&mut buf), if stdin_open => match read? {
                0 => stdin_open = false,
                n => {
                    let data = decoder.push(&buf[..n]);
                    if !data.is_empty() {
                        send(&mut sink, &ClientRequest::Input { data }).await?;
                    }
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match decode::<ClientEvent>(text.as_str()) {
                    Ok(event) => {
                        if let Step::Exit(code) = console.handle(event, None)? {
                            return Ok(code);
                        }
                    }
                    Err(e) => debug!(error = %e, "ignoring unparseable frame"),
                },
                Some(Ok(Message::Close(frame))) => return closed(frame),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(0),
            }
        }
    }
}

async fn oneshot(socket: WsStream) -> Result<i32> {
    let mut console = Console::stdio(false);
    let (mut sink, mut stream) = socket.split();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Option<String> = None;
    let mut last_code = 0;

    loop {
        tokio::select! {
            line = lines.next_line(), if pending.is_none() => {
                let Some(line) = line? else { break };
                let command = line.trim();
                if command.is_empty() {
                    continue;
                }
                let request_id = generate_request_id();
                send(&mut sink, &ClientRequest::Command {
                    command: command.to_string(),
                    request_id: Some(request_id.clone()),
                }).await?;
                pending = Some(request_id);
            }
            _ = tokio::signal::ctrl_c(), if pending.is_some() => {
                if let Some(request_id) = pending.clone() {
                    send(&mut sink, &ClientRequest::Cancel { request_id }).await?;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match decode::<ClientEvent>(text.as_str()) {
                    Ok(event) => {
                        if let Step::Exit(code) = console.handle(event, pending.as_deref())? {
                            last_code = code;
                            pending = None;
                        }
                    }
                    Err(e) => debug!(error = %e, "ignoring unparseable frame"),
                },
                Some(Ok(Message::Close(frame))) => return closed(frame).map(|_| last_code),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(last_code),
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    Ok(last_code)
}
