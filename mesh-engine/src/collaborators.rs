//! Trait boundaries onto every external collaborator the engine depends on
//! but does not own: the coordinator stream, the signaling channel, the
//! remote-shell server, and the route/DNS sinks. Concrete implementations
//! live outside this workspace; tests use hand-written fakes (see
//! `mesh-engine::testing`).
use async_trait::async_trait;
use mesh_proto::{DnsConfig, Message, Route, SyncResponse};

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("stream error: {0}")]
    Stream(String),
    #[error("addressing error: no peer connection for key {0}")]
    UnknownPeer(String),
}

/// Periodic pull from the coordinator. A `None` from `recv` means the stream
/// ended; any `Err` is treated as a transient stream failure and trips the
/// engine's shared cancellation signal.
#[async_trait]
pub trait CoordinatorStream: Send + 'static {
    async fn recv(&mut self) -> Option<Result<SyncResponse, CollaboratorError>>;
}

/// The read half of the signaling channel. Owned exclusively by the
/// signaling dispatcher task.
#[async_trait]
pub trait SignalingReceiver: Send + 'static {
    async fn recv(&mut self) -> Option<Result<Message, CollaboratorError>>;
}

/// The write half of the signaling channel, shared by every peer connection.
#[async_trait]
pub trait SignalingSender: Send + Sync + 'static {
    async fn send(&self, msg: Message) -> Result<(), CollaboratorError>;

    /// Whether the underlying transport is currently connected. The
    /// reconnect worker skips an iteration rather than attempting to open a
    /// connection it cannot signal over.
    fn is_ready(&self) -> bool;
}

#[async_trait]
pub trait ShellServer: Send + Sync + 'static {
    async fn start(&self) -> Result<(), CollaboratorError>;
    async fn stop(&self) -> Result<(), CollaboratorError>;
    async fn add_authorized_key(&self, peer_key: &str, pub_key: &str) -> Result<(), CollaboratorError>;
    async fn remove_authorized_key(&self, peer_key: &str) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait RouteSink: Send + Sync + 'static {
    async fn update_routes(&self, serial: u64, routes: Vec<Route>);
}

#[async_trait]
pub trait DnsSink: Send + Sync + 'static {
    async fn update_dns(&self, serial: u64, dns: DnsConfig);
}
