//! Wire protocol shared by the relay, the host and clients.
//!
//! ## Frames
//!
//! - client → relay: [`ClientRequest`]
//! - relay → host: [`HostCommand`] (client frames annotated with `clientId`)
//! - host → relay: [`HostEvent`]
//! - relay → client: [`ClientEvent`] (host events forwarded, plus relay notices)

mod frames;
mod id;

pub use frames::{
    decode, encode, ClientEvent, ClientRequest, HostCommand, HostEvent, ProtocolFamily,
    MAX_FRAME_BYTES,
};
pub use id::{generate_request_id, ClientId};

/// Channel the host-side components publish their events on.
pub type HostEventSender = tokio::sync::mpsc::UnboundedSender<HostEvent>;

/// `system` notice texts the relay emits. The host keys lifecycle actions on
/// the connect/disconnect notices, so these are part of the contract.
pub mod notice {
    /// To a client, right after admission.
    pub const CONNECTED: &str = "connected";
    /// To the host, when a client is admitted or replayed after host reconnect.
    pub const CLIENT_CONNECTED: &str = "client connected";
    /// To the host, when a client goes away.
    pub const CLIENT_DISCONNECTED: &str = "client disconnected";
    /// To clients, when a host (re)connects.
    pub const HOST_ONLINE: &str = "host is online";
    /// To clients, when the host connection closes.
    pub const HOST_DISCONNECTED: &str = "host disconnected";
    /// To a host connection evicted by a newer one.
    pub const SUPERSEDED: &str = "superseded";
    /// Error text for a client attaching without a live host.
    pub const HOST_OFFLINE: &str = "host offline";
}
