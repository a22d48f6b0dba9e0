//! WebSocket endpoints for hosts and clients.
//!
//! Each connection gets a writer task draining its [`ConnectionHandle`]
//! queue, while the upgrade task runs the reader loop. Routing itself lives
//! in the registry.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::handlers::AppState;
use super::registry::{ConnectionHandle, HostSession, Outbound};
use super::types::ConnectParams;
use crate::protocol::{ClientEvent, ClientId, HostCommand};

/// Which side of the relay a connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
}

impl Role {
    fn send_error(self, conn: &ConnectionHandle, message: impl Into<String>) -> bool {
        let message = message.into();
        match self {
            Role::Host => conn.send_frame(&HostCommand::Error { message }),
            Role::Client => conn.send_frame(&ClientEvent::Error { message }),
        }
    }
}

/// `GET /ws/host` upgrade handler.
pub async fn host_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> impl IntoResponse {
    let max = state.registry.max_frame_bytes();
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| handle_socket(socket, state, params, Role::Host))
}

/// `GET /ws/client` upgrade handler.
pub async fn client_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> impl IntoResponse {
    let max = state.registry.max_frame_bytes();
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| handle_socket(socket, state, params, Role::Client))
}

async fn handle_socket(socket: WebSocket, state: AppState, params: ConnectParams, role: Role) {
    let (sink, stream) = socket.split();
    let (conn, outbound) = state.registry.connection();
    tokio::spawn(write_loop(sink, outbound));

    let host_id = params.host_id.unwrap_or_default();
    let session = match state.registry.verify(
        &host_id,
        params.username.as_deref().unwrap_or_default(),
        params.password.as_deref().unwrap_or_default(),
    ) {
        Ok(session) => session,
        Err(e) => {
            warn!(host = %host_id, ?role, error = %e, "connection rejected");
            role.send_error(&conn, e.to_string());
            conn.send_close(close_code::POLICY, "authentication failed");
            return;
        }
    };

    match role {
        Role::Host => serve_host(state, session, conn, stream).await,
        Role::Client => serve_client(state, session, conn, stream).await,
    }
}

async fn serve_host(
    state: AppState,
    session: Arc<HostSession>,
    conn: ConnectionHandle,
    mut stream: SplitStream<WebSocket>,
) {
    let registry = &state.registry;
    if let Err(e) = registry.attach_host(&session, conn.clone()) {
        warn!(host = %session.host_id(), error = %e, "failed to attach host");
        conn.send_close(close_code::ERROR, "internal error");
        return;
    }

    loop {
        tokio::select! {
            _ = conn.terminated() => {
                debug!(conn = conn.id(), "host connection terminated");
                break;
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = registry.route_from_host(&session, &conn, text.as_str()) {
                        warn!(error = %e, "failed to route host frame");
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    Role::Host.send_error(&conn, "binary frames are not supported");
                }
                Some(Ok(Message::Pong(_))) => conn.mark_alive(),
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(conn = conn.id(), error = %e, "host socket error");
                    break;
                }
            }
        }
    }

    if let Err(e) = registry.detach_host(&session, conn.id()) {
        warn!(error = %e, "failed to detach host");
    }
}

async fn serve_client(
    state: AppState,
    session: Arc<HostSession>,
    conn: ConnectionHandle,
    mut stream: SplitStream<WebSocket>,
) {
    let registry = &state.registry;
    let client_id: ClientId = match registry.attach_client(&session, conn.clone()) {
        Ok(id) => id,
        Err(e) => {
            debug!(host = %session.host_id(), error = %e, "client not admitted");
            Role::Client.send_error(&conn, e.to_string());
            conn.send_close(close_code::NORMAL, e.to_string());
            return;
        }
    };

    loop {
        tokio::select! {
            _ = conn.terminated() => {
                debug!(client = %client_id, "client connection terminated");
                break;
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = registry.route_from_client(&session, client_id, text.as_str()) {
                        warn!(error = %e, "failed to route client frame");
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    Role::Client.send_error(&conn, "binary frames are not supported");
                }
                Some(Ok(Message::Pong(_))) => conn.mark_alive(),
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(client = %client_id, error = %e, "client socket error");
                    break;
                }
            }
        }
    }

    if let Err(e) = registry.detach_client(&session, client_id) {
        warn!(error = %e, "failed to detach client");
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        let (message, last) = match item {
            Outbound::Frame(text) => (Message::Text(text.into()), false),
            Outbound::Ping => (Message::Ping(Bytes::new()), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };
        if sink.send(message).await.is_err() || last {
            break;
        }
    }
    let _ = sink.close().await;
}
