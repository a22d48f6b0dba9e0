//! Identifiers minted by the relay.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Counter for client id generation.
static CLIENT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Counter for relay-generated request ids.
static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifier of one client connection, minted by the relay at admission.
///
/// Client IDs come from an atomic counter, so they are unique within a
/// single relay process lifetime. The ID is displayed as `client-XXXXXXXX`
/// where X is a hexadecimal digit, and travels on the wire in that form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    /// Mint a new unique client ID.
    pub fn new() -> Self {
        Self(CLIENT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Create a ClientId from a raw u64 value.
    ///
    /// This is primarily for testing.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{:08x}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = crate::error::RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("client-")
            .and_then(|hex| u64::from_str_radix(hex, 16).ok())
            .map(ClientId)
            .ok_or_else(|| {
                crate::error::RelayError::ProtocolViolation(format!("invalid client id: {}", s))
            })
    }
}

impl Serialize for ClientId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClientId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Generate a request id for a `command` that arrived without one.
pub fn generate_request_id() -> String {
    format!("req-{:08x}", REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uniqueness() {
        let mut ids = HashSet::new();
        for _ in 0..10_000 {
            let id = ClientId::new();
            assert!(ids.insert(id), "Duplicate ID generated: {}", id);
        }
    }

    #[test]
    fn test_display_format() {
        assert_eq!(ClientId::from_raw(255).to_string(), "client-000000ff");
        assert_eq!(ClientId::from_raw(0x12345678).to_string(), "client-12345678");
    }

    #[test]
    fn test_parse() {
        let id: ClientId = "client-000000ff".parse().unwrap();
        assert_eq!(id.as_u64(), 255);

        assert!("000000ff".parse::<ClientId>().is_err());
        assert!("sess-000000ff".parse::<ClientId>().is_err());
        assert!("client-zz".parse::<ClientId>().is_err());
        assert!("".parse::<ClientId>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let id = ClientId::from_raw(7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"client-00000007\"");

        let back: ClientId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<ClientId>("\"bogus\"").is_err());
    }

    #[test]
    fn test_generated_request_ids_differ() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert!(a.starts_with("req-"));
        assert_ne!(a, b);
    }
}
