//! Wire types exchanged between the peer connection engine and its two streaming
//! collaborators: the coordinator (`NetworkMap` snapshots) and the signaling
//! channel (`OFFER`/`ANSWER`/`CANDIDATE`/`MODE` messages).
//!
//! These types only describe shapes; encoding/decoding onto an actual transport
//! is the job of the coordinator/signaling RPC clients, which live outside this
//! workspace.

pub mod coordinator;
pub mod signaling;

pub use coordinator::{
    DnsConfig, HostConfig, NetworkMap, OfflinePeer, PeerConfig, ProtectedHostConfig,
    RemotePeerConfig, Route, SyncResponse, WiretrusteeConfig,
};
pub use signaling::{FeatureBit, Message, MessageBody, MessageType, ModePayload};

/// A WireGuard-style public key, hex-encoded on the wire.
///
/// Kept as an opaque byte string at this layer; the tunnel driver is the one
/// collaborator that needs to interpret it cryptographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize, serde::Serialize)]
pub struct PublicKey(pub String);

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PublicKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PublicKey {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}
