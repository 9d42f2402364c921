//! The peer connection engine: reconciles coordinator network maps into a
//! live set of ICE-negotiated tunnel connections, dispatching signaling
//! messages to the peer they name and retrying failed connections with
//! jittered backoff.
pub mod collaborators;
pub mod config;
pub mod credentials;
mod dispatcher;
pub mod engine;
pub mod peer;
mod reconnect;
#[cfg(test)]
mod testing;
mod wire;

pub use collaborators::{CollaboratorError, CoordinatorStream, DnsSink, RouteSink, ShellServer, SignalingReceiver, SignalingSender};
pub use config::{ConfigError, EngineConfig};
pub use credentials::IceCredentials;
pub use engine::{Engine, EngineCollaborators, EngineError};
pub use peer::{PeerConnection, PeerConnectionConfig, PeerConnectionError, PeerState};
