//! Host agent: the host's single connection to the relay.

use std::future::Future;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::manager::HostSessionManager;
use crate::endpoint::{api_url, websocket_url, Credentials};
use crate::error::RelayError;
use crate::protocol::{decode, encode, HostCommand, HostEvent, ProtocolFamily, MAX_FRAME_BYTES};
use crate::relay::{ErrorResponse, RegisterHostRequest, RegisterHostResponse, HOST_PATH};
use crate::security::CommandPolicy;
use crate::shell::ShellCandidate;
use crate::Result;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// How long queued events may take to reach the relay after the session ends.
const FLUSH_GRACE: Duration = Duration::from_secs(2);

/// Connection settings for [`run`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Relay base URL (`http`, `https`, `ws` or `wss`).
    pub relay_url: String,
    pub credentials: Credentials,
    /// Register the identity over HTTP before connecting.
    pub register: bool,
    /// Events larger than this are dropped instead of sent.
    pub max_frame_bytes: usize,
}

impl AgentConfig {
    pub fn new(relay_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            relay_url: relay_url.into(),
            credentials,
            register: false,
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }

    pub fn with_register(mut self, register: bool) -> Self {
        self.register = register;
        self
    }
}

/// Register (or refresh) the host identity and return the host id the relay
/// assigned.
pub async fn register(relay_url: &str, credentials: &Credentials) -> Result<String> {
    let url = api_url(relay_url, "/api/register-host")?;
    let request = RegisterHostRequest {
        host_id: Some(credentials.host_id.clone()).filter(|id| !id.is_empty()),
        username: credentials.username.clone(),
        password: credentials.password.clone(),
    };

    let response = reqwest::Client::new()
        .post(url)
        .json(&request)
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        let body: RegisterHostResponse = response.json().await?;
        info!(host = %body.host_id, "host registered");
        return Ok(body.host_id);
    }

    let message = response
        .json::<ErrorResponse>()
        .await
        .map(|e| e.message)
        .unwrap_or_else(|_| status.to_string());
    match status {
        StatusCode::CONFLICT => Err(RelayError::CredentialConflict(credentials.host_id.clone())),
        StatusCode::BAD_REQUEST => Err(RelayError::MissingCredentials),
        _ => Err(RelayError::AuthFailed(message)),
    }
}

/// Serve relay traffic until Ctrl-C or until the relay closes the connection.
pub async fn run(
    config: AgentConfig,
    mode: ProtocolFamily,
    policy: CommandPolicy,
    shells: Vec<ShellCandidate>,
) -> Result<()> {
    run_until(config, mode, policy, shells, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Serve relay traffic until `shutdown` resolves or the connection ends.
///
/// A clean close from either side yields `Ok`; an authentication rejection
/// or a transport failure yields `Err`. Every command and shell started for
/// the session is stopped before returning.
pub async fn run_until<F>(
    mut config: AgentConfig,
    mode: ProtocolFamily,
    policy: CommandPolicy,
    shells: Vec<ShellCandidate>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    if config.register {
        config.credentials.host_id = register(&config.relay_url, &config.credentials).await?;
    }

    let url = websocket_url(&config.relay_url, HOST_PATH, &config.credentials)?;
    let (socket, _) = connect_async(url.as_str()).await?;
    info!(host = %config.credentials.host_id, %mode, "connected to relay");

    let (sink, mut stream) = socket.split();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel();
    let mut writer = tokio::spawn(write_loop(sink, events_rx, stop_rx, config.max_frame_bytes));

    let manager = HostSessionManager::new(mode, policy, shells, events_tx);
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down host agent");
                break Ok(());
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match decode::<HostCommand>(text.as_str()) {
                    Ok(frame) => {
                        if let Err(e) = manager.handle(frame) {
                            error!(error = %e, "host session state is broken");
                            break Err(e);
                        }
                    }
                    Err(e) => warn!(error = %e, "ignoring unparseable relay frame"),
                },
                Some(Ok(Message::Close(frame))) => break close_outcome(frame),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
                None => break Ok(()),
            }
        }
    };

    if let Err(e) = manager.shutdown_and_wait("relay connection closed").await {
        warn!(error = %e, "failed to stop host sessions");
    }
    drop(manager);

    let _ = stop_tx.send(());
    if tokio::time::timeout(FLUSH_GRACE, &mut writer).await.is_err() {
        debug!("writer did not finish in time");
        writer.abort();
    }

    outcome
}

fn close_outcome(frame: Option<CloseFrame>) -> Result<()> {
    match frame {
        Some(frame) if frame.code == CloseCode::Policy => {
            Err(RelayError::AuthFailed(frame.reason.as_str().to_string()))
        }
        Some(frame) => {
            info!(
                code = u16::from(frame.code),
                reason = frame.reason.as_str(),
                "relay closed the connection"
            );
            Ok(())
        }
        None => Ok(()),
    }
}

async fn write_loop(
    mut sink: WsSink,
    mut events: mpsc::UnboundedReceiver<HostEvent>,
    mut stop: oneshot::Receiver<()>,
    max_frame_bytes: usize,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = &mut stop => {
                while let Ok(event) = events.try_recv() {
                    if send_event(&mut sink, &event, max_frame_bytes).await.is_err() {
                        return;
                    }
                }
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "host shutting down".into(),
                    })))
                    .await;
                break;
            }
        };
        match event {
            Some(event) => {
                if let Err(e) = send_event(&mut sink, &event, max_frame_bytes).await {
                    debug!(error = %e, "relay socket closed");
                    return;
                }
            }
            None => break,
        }
    }
    let _ = sink.close().await;
}

async fn send_event(sink: &mut WsSink, event: &HostEvent, max_frame_bytes: usize) -> Result<()> {
    let text = encode(event)?;
    if text.len() > max_frame_bytes {
        warn!(kind = event.kind(), len = text.len(), "dropping oversized event");
        return Ok(());
    }
    sink.send(Message::text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_defaults() {
        let config = AgentConfig::new("http://relay", Credentials::new("h1", "u", "p"));
        assert!(!config.register);
        assert_eq!(config.max_frame_bytes, MAX_FRAME_BYTES);
        assert!(config.with_register(true).register);
    }

    #[test]
    fn test_policy_close_is_auth_failure() {
        let err = close_outcome(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "authentication failed".into(),
        }))
        .unwrap_err();
        assert!(matches!(err, RelayError::AuthFailed(ref r) if r == "authentication failed"));
    }

    #[test]
    fn test_normal_close_is_clean() {
        assert!(close_outcome(None).is_ok());
        assert!(close_outcome(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "superseded".into(),
        }))
        .is_ok());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = AgentConfig::new(
            format!("http://127.0.0.1:{}", port),
            Credentials::new("h1", "u", "p"),
        );
        let result = run_until(
            config,
            ProtocolFamily::Oneshot,
            CommandPolicy::default(),
            Vec::new(),
            std::future::pending(),
        )
        .await;
        assert!(result.is_err());
    }
}
