//! Abstract interface onto the kernel tunnel driver.
//!
//! The driver itself (interface creation, key exchange, kernel plumbing) lives
//! outside this workspace; the engine only ever talks to it through
//! [`TunnelDriver`].
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;

/// One WireGuard-style peer entry as installed into the kernel interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelPeer {
    pub public_key: String,
    pub allowed_ips: Vec<String>,
    pub endpoint: SocketAddr,
    pub preshared_key: Option<String>,
    pub persistent_keepalive: Option<u16>,
}

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("failed to create tunnel interface: {0}")]
    Create(String),
    #[error("failed to configure tunnel interface: {0}")]
    Configure(String),
    #[error("failed to update tunnel address: {0}")]
    UpdateAddr(String),
    #[error("failed to update peer {public_key}: {reason}")]
    UpdatePeer { public_key: String, reason: String },
    #[error("failed to remove peer {public_key}: {reason}")]
    RemovePeer { public_key: String, reason: String },
}

/// Everything the engine needs from the kernel tunnel interface.
///
/// Mirrors `tun::Tun`'s split between interface lifecycle and per-peer
/// mutation, generalized from a single-peer abstraction to the
/// multi-peer, `UpdatePeer`/`RemovePeer` shape the coordinator drives.
#[async_trait]
pub trait TunnelDriver: Send + Sync + 'static {
    /// Creates the kernel interface. Called once during `Engine::start`.
    async fn create(&self, name: &str) -> Result<(), TunnelError>;

    /// Configures the private key and listen port. Called once during
    /// `Engine::start`, after `create`.
    async fn configure(&self, private_key: &str, port: u16) -> Result<(), TunnelError>;

    /// Reconfigures the interface's own address. Called whenever
    /// `peer_config.address` changes, even across a stale `serial`.
    async fn update_addr(&self, address: IpAddr) -> Result<(), TunnelError>;

    /// Installs or updates a peer after a successful ICE negotiation.
    async fn update_peer(&self, peer: TunnelPeer) -> Result<(), TunnelError>;

    /// Removes a peer, e.g. on close, allowed-IPs change, or reconciliation
    /// removal.
    async fn remove_peer(&self, public_key: &str) -> Result<(), TunnelError>;

    /// Tears the interface down entirely. Called once during `Engine::stop`.
    async fn close(&self) -> Result<(), TunnelError>;
}
