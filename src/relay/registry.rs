//! In-memory registry of host identities and their live connections.
//!
//! Each registered host id owns one [`HostSession`]: the credentials, at most
//! one host connection and any number of client connections. All routing
//! decisions are made here; the WebSocket layer only moves frames between
//! sockets and [`ConnectionHandle`]s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, trace, warn};

use super::types::{HostStatusResponse, RegisterHostRequest};
use crate::error::RelayError;
use crate::protocol::{
    decode, encode, notice, ClientEvent, ClientId, ClientRequest, HostCommand, HostEvent,
    ProtocolFamily, MAX_FRAME_BYTES,
};
use crate::Result;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_HOST_ID: AtomicU64 = AtomicU64::new(1);

/// Something to put on a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame.
    Frame(String),
    /// WebSocket ping.
    Ping,
    /// Close frame; the writer stops after it.
    Close { code: u16, reason: String },
}

/// Sending half of one WebSocket connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: mpsc::UnboundedSender<Outbound>,
    alive: Arc<AtomicBool>,
    terminate: Arc<Notify>,
    max_frame_bytes: usize,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains.
    pub fn new(max_frame_bytes: usize) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            alive: Arc::new(AtomicBool::new(true)),
            terminate: Arc::new(Notify::new()),
            max_frame_bytes,
        };
        (handle, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a frame. Oversized frames are dropped with a warning.
    ///
    /// Returns `false` once the connection's writer is gone.
    pub fn send_frame<T: Serialize>(&self, frame: &T) -> bool {
        let text = match encode(frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(conn = self.id, error = %e, "failed to encode frame");
                return !self.tx.is_closed();
            }
        };
        if text.len() > self.max_frame_bytes {
            warn!(
                conn = self.id,
                size = text.len(),
                max = self.max_frame_bytes,
                "dropping oversized frame"
            );
            return !self.tx.is_closed();
        }
        self.tx.send(Outbound::Frame(text)).is_ok()
    }

    pub fn send_close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .is_ok()
    }

    pub fn ping(&self) -> bool {
        self.tx.send(Outbound::Ping).is_ok()
    }

    /// Record a pong.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Clear the alive flag, returning whether it was set.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Ask the connection's reader loop to stop.
    pub fn terminate(&self) {
        self.terminate.notify_one();
    }

    /// Resolves once [`ConnectionHandle::terminate`] was called.
    pub async fn terminated(&self) {
        self.terminate.notified().await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Registered credentials of a host id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub host_id: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug)]
struct Peers {
    identity: HostIdentity,
    host: Option<ConnectionHandle>,
    clients: HashMap<ClientId, ConnectionHandle>,
}

/// Relay-side state of one host id.
#[derive(Debug)]
pub struct HostSession {
    host_id: String,
    peers: Mutex<Peers>,
}

impl HostSession {
    fn new(identity: HostIdentity) -> Self {
        Self {
            host_id: identity.host_id.clone(),
            peers: Mutex::new(Peers {
                identity,
                host: None,
                clients: HashMap::new(),
            }),
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    fn peers(&self) -> Result<MutexGuard<'_, Peers>> {
        self.peers.lock().map_err(|_| RelayError::LockPoisoned)
    }

    pub fn host_online(&self) -> Result<bool> {
        Ok(self.peers()?.host.is_some())
    }

    pub fn client_count(&self) -> Result<usize> {
        Ok(self.peers()?.clients.len())
    }
}

/// Host identities and their connections.
#[derive(Debug)]
pub struct HostRegistry {
    hosts: RwLock<HashMap<String, Arc<HostSession>>>,
    family: ProtocolFamily,
    max_frame_bytes: usize,
}

impl HostRegistry {
    pub fn new(family: ProtocolFamily) -> Self {
        Self::with_max_frame_bytes(family, MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(family: ProtocolFamily, max_frame_bytes: usize) -> Self {
        Self {
            hosts: RwLock::new(HashMap::new()),
            family,
            max_frame_bytes,
        }
    }

    pub fn family(&self) -> ProtocolFamily {
        self.family
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Create a handle for a new connection of this relay.
    pub fn connection(&self) -> (ConnectionHandle, mpsc::UnboundedReceiver<Outbound>) {
        ConnectionHandle::new(self.max_frame_bytes)
    }

    /// Register a host identity or refresh its password.
    ///
    /// Returns the host id, generated when the request has none.
    pub fn register(&self, req: RegisterHostRequest) -> Result<String> {
        let username = req.username.trim();
        if username.is_empty() || req.password.is_empty() {
            return Err(RelayError::MissingCredentials);
        }

        let mut hosts = self.hosts.write().map_err(|_| RelayError::LockPoisoned)?;

        let host_id = match req.host_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => loop {
                let id = format!("host-{:08x}", NEXT_HOST_ID.fetch_add(1, Ordering::Relaxed));
                if !hosts.contains_key(&id) {
                    break id;
                }
            },
        };

        if let Some(session) = hosts.get(&host_id) {
            let mut peers = session.peers()?;
            if peers.identity.username != username {
                return Err(RelayError::CredentialConflict(host_id));
            }
            peers.identity.password = req.password;
            info!(host = %host_id, "host credentials refreshed");
            return Ok(host_id);
        }

        let identity = HostIdentity {
            host_id: host_id.clone(),
            username: username.to_string(),
            password: req.password,
        };
        hosts.insert(host_id.clone(), Arc::new(HostSession::new(identity)));
        info!(host = %host_id, "host registered");
        Ok(host_id)
    }

    /// Check connection credentials against a registered identity.
    pub fn verify(&self, host_id: &str, username: &str, password: &str) -> Result<Arc<HostSession>> {
        let session = self
            .hosts
            .read()
            .map_err(|_| RelayError::LockPoisoned)?
            .get(host_id)
            .cloned()
            .ok_or_else(|| RelayError::AuthFailed("unknown host id".to_string()))?;

        {
            let peers = session.peers()?;
            if peers.identity.username != username || peers.identity.password != password {
                return Err(RelayError::AuthFailed("invalid credentials".to_string()));
            }
        }
        Ok(session)
    }

    pub fn get(&self, host_id: &str) -> Result<Option<Arc<HostSession>>> {
        Ok(self
            .hosts
            .read()
            .map_err(|_| RelayError::LockPoisoned)?
            .get(host_id)
            .cloned())
    }

    /// Public status of a host id.
    pub fn status(&self, host_id: &str) -> Result<HostStatusResponse> {
        let session = self
            .get(host_id)?
            .ok_or_else(|| RelayError::HostNotFound(host_id.to_string()))?;
        let peers = session.peers()?;
        Ok(HostStatusResponse {
            host_id: peers.identity.host_id.clone(),
            username: peers.identity.username.clone(),
            host_online: peers.host.is_some(),
            client_connected: !peers.clients.is_empty(),
        })
    }

    pub fn host_count(&self) -> Result<usize> {
        Ok(self.hosts.read().map_err(|_| RelayError::LockPoisoned)?.len())
    }

    /// Every open connection, for the liveness sweep.
    pub fn connections(&self) -> Result<Vec<ConnectionHandle>> {
        let sessions: Vec<Arc<HostSession>> = self
            .hosts
            .read()
            .map_err(|_| RelayError::LockPoisoned)?
            .values()
            .cloned()
            .collect();

        let mut all = Vec::new();
        for session in sessions {
            let peers = session.peers()?;
            all.extend(peers.host.iter().cloned());
            all.extend(peers.clients.values().cloned());
        }
        Ok(all)
    }

    /// Install a host connection, evicting any previous one.
    pub fn attach_host(&self, session: &HostSession, conn: ConnectionHandle) -> Result<()> {
        let evicted = {
            let mut peers = session.peers()?;
            for (&client_id, client) in &peers.clients {
                conn.send_frame(&HostCommand::System {
                    client_id: Some(client_id),
                    message: notice::CLIENT_CONNECTED.to_string(),
                });
                client.send_frame(&ClientEvent::system(Some(client_id), notice::HOST_ONLINE));
            }
            peers.host.replace(conn)
        };

        if let Some(old) = evicted {
            info!(host = %session.host_id, conn = old.id(), "superseding previous host connection");
            old.send_frame(&HostCommand::System {
                client_id: None,
                message: notice::SUPERSEDED.to_string(),
            });
            old.send_close(1000, notice::SUPERSEDED);
            old.terminate();
        }
        info!(host = %session.host_id, "host connected");
        Ok(())
    }

    /// Admit a client connection. Fails with [`RelayError::HostOffline`] when
    /// no host connection is live.
    pub fn attach_client(&self, session: &HostSession, conn: ConnectionHandle) -> Result<ClientId> {
        let mut peers = session.peers()?;
        let Some(host) = peers.host.clone() else {
            return Err(RelayError::HostOffline);
        };

        let client_id = ClientId::new();
        conn.send_frame(&ClientEvent::system(Some(client_id), notice::CONNECTED));
        host.send_frame(&HostCommand::System {
            client_id: Some(client_id),
            message: notice::CLIENT_CONNECTED.to_string(),
        });
        peers.clients.insert(client_id, conn);

        info!(host = %session.host_id, client = %client_id, "client connected");
        Ok(client_id)
    }

    /// Validate a client frame and forward it to the host.
    pub fn route_from_client(&self, session: &HostSession, client_id: ClientId, text: &str) -> Result<()> {
        let peers = session.peers()?;
        let Some(client) = peers.clients.get(&client_id) else {
            return Ok(());
        };

        let request = match decode::<ClientRequest>(text) {
            Ok(request) => request,
            Err(e) => {
                debug!(client = %client_id, error = %e, "invalid client frame");
                client.send_frame(&ClientEvent::error(format!("invalid message: {}", e)));
                return Ok(());
            }
        };

        if request.family() != self.family {
            client.send_frame(&ClientEvent::error(format!(
                "message type '{}' is not allowed in {} mode",
                request.kind(),
                self.family
            )));
            return Ok(());
        }

        match &peers.host {
            Some(host) => {
                trace!(client = %client_id, kind = request.kind(), "client -> host");
                host.send_frame(&request.annotate(client_id));
            }
            None => {
                client.send_frame(&ClientEvent::error(RelayError::HostDisconnected.to_string()));
            }
        }
        Ok(())
    }

    /// Validate a host frame and deliver it to the right client(s).
    pub fn route_from_host(&self, session: &HostSession, conn: &ConnectionHandle, text: &str) -> Result<()> {
        let event = match decode::<HostEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(host = %session.host_id, error = %e, "invalid host frame");
                conn.send_frame(&HostCommand::Error {
                    message: format!("invalid message: {}", e),
                });
                return Ok(());
            }
        };

        if !event.permitted(self.family) {
            conn.send_frame(&HostCommand::Error {
                message: format!(
                    "message type '{}' is not allowed in {} mode",
                    event.kind(),
                    self.family
                ),
            });
            return Ok(());
        }

        let mut peers = session.peers()?;
        if peers.host.as_ref().map(|h| h.id()) != Some(conn.id()) {
            debug!(host = %session.host_id, conn = conn.id(), "dropping frame from superseded host");
            return Ok(());
        }

        let kind = event.kind();
        let targets: Vec<ClientId> = match event.client_id() {
            Some(client_id) => vec![client_id],
            None if matches!(event, HostEvent::System { .. }) => {
                peers.clients.keys().copied().collect()
            }
            None if peers.clients.len() == 1 => peers.clients.keys().copied().collect(),
            None => {
                debug!(host = %session.host_id, kind, "untagged frame with no single client, dropped");
                return Ok(());
            }
        };

        let frame = ClientEvent::from(event);
        let mut stale = Vec::new();
        for client_id in targets {
            match peers.clients.get(&client_id) {
                Some(client) => {
                    if !client.send_frame(&frame) {
                        stale.push(client_id);
                    }
                }
                None => trace!(client = %client_id, kind, "target client gone, dropped"),
            }
        }

        for client_id in stale {
            debug!(client = %client_id, "pruning closed client connection");
            peers.clients.remove(&client_id);
            conn.send_frame(&HostCommand::System {
                client_id: Some(client_id),
                message: notice::CLIENT_DISCONNECTED.to_string(),
            });
        }
        Ok(())
    }

    /// Remove a host connection, unless a newer one already replaced it.
    pub fn detach_host(&self, session: &HostSession, conn_id: u64) -> Result<bool> {
        let mut peers = session.peers()?;
        if peers.host.as_ref().map(|h| h.id()) != Some(conn_id) {
            return Ok(false);
        }
        peers.host = None;
        for (&client_id, client) in &peers.clients {
            client.send_frame(&ClientEvent::system(Some(client_id), notice::HOST_DISCONNECTED));
        }
        info!(host = %session.host_id, clients = peers.clients.len(), "host disconnected");
        Ok(true)
    }

    /// Remove a client connection and tell the host.
    pub fn detach_client(&self, session: &HostSession, client_id: ClientId) -> Result<bool> {
        let mut peers = session.peers()?;
        if peers.clients.remove(&client_id).is_none() {
            return Ok(false);
        }
        if let Some(host) = &peers.host {
            host.send_frame(&HostCommand::System {
                client_id: Some(client_id),
                message: notice::CLIENT_DISCONNECTED.to_string(),
            });
        }
        info!(host = %session.host_id, client = %client_id, "client disconnected");
        Ok(true)
    }
}
