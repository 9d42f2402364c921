//! Thin process wrapper around [`mesh_engine::Engine`]: parses `EngineConfig`,
//! sets up logging, wires the engine to stand-in collaborators, and runs
//! until interrupted.
//!
//! The coordinator RPC client, the signaling transport and the real kernel
//! tunnel driver live outside this workspace (see the crate docs on
//! `mesh_engine::collaborators` and `tun_iface::TunnelDriver`); the
//! implementations below are just enough to exercise `Engine::start`/`stop`
//! end to end without a live coordinator.
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use mesh_engine::{
    CollaboratorError, CoordinatorStream, DnsSink, Engine, EngineCollaborators, EngineConfig,
    RouteSink, SignalingReceiver, SignalingSender,
};
use mesh_proto::{DnsConfig, Message, Route, SyncResponse};
use tun_iface::{TunnelDriver, TunnelError, TunnelPeer};

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::parse();
    config.validate().context("invalid engine configuration")?;

    logging::setup_global_subscriber("", false).context("failed to set up logging")?;

    tracing::info!(
        interface = %config.interface_name,
        address = %config.local_address,
        "Starting peer connection engine"
    );

    // EngineConfig only carries the private key; deriving the corresponding
    // public key is the coordinator client's job in a real deployment.
    let local_key = mesh_proto::PublicKey::from(config.private_key.clone());

    let collaborators = EngineCollaborators {
        coordinator: Box::new(IdleCoordinatorStream),
        signaling_rx: Box::new(IdleSignalingReceiver),
        signaling_tx: Arc::new(LoggingSignalingSender),
        tunnel: Arc::new(LoggingTunnelDriver::new(config.interface_name.clone())),
        shell: None,
        routes: Arc::new(LoggingRouteSink),
        dns: Arc::new(LoggingDnsSink),
    };

    let engine = Engine::start(local_key, config, collaborators)
        .await
        .context("failed to start engine")?;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;

    tracing::info!("Shutting down");
    engine.stop().await.context("failed to stop engine cleanly")?;

    Ok(())
}

/// Stands in for the coordinator RPC client: never yields an update. A real
/// integration streams `SyncResponse`s from the account's coordinator.
struct IdleCoordinatorStream;

#[async_trait]
impl CoordinatorStream for IdleCoordinatorStream {
    async fn recv(&mut self) -> Option<Result<SyncResponse, CollaboratorError>> {
        std::future::pending().await
    }
}

/// Stands in for the signaling transport's read half.
struct IdleSignalingReceiver;

#[async_trait]
impl SignalingReceiver for IdleSignalingReceiver {
    async fn recv(&mut self) -> Option<Result<Message, CollaboratorError>> {
        std::future::pending().await
    }
}

/// Logs outbound signaling traffic instead of sending it anywhere.
struct LoggingSignalingSender;

#[async_trait]
impl SignalingSender for LoggingSignalingSender {
    async fn send(&self, msg: Message) -> Result<(), CollaboratorError> {
        tracing::debug!(remote_key = %msg.remote_key, kind = ?msg.body.kind, "Would send signaling message");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        false
    }
}

/// Logs tunnel-driver calls instead of touching the kernel.
struct LoggingTunnelDriver {
    name: String,
}

impl LoggingTunnelDriver {
    fn new(name: String) -> Self {
        Self { name }
    }
}

#[async_trait]
impl TunnelDriver for LoggingTunnelDriver {
    async fn create(&self, name: &str) -> Result<(), TunnelError> {
        tracing::info!(%name, "Would create tunnel interface");
        Ok(())
    }

    async fn configure(&self, _private_key: &str, port: u16) -> Result<(), TunnelError> {
        tracing::info!(interface = %self.name, %port, "Would configure tunnel interface");
        Ok(())
    }

    async fn update_addr(&self, address: IpAddr) -> Result<(), TunnelError> {
        tracing::info!(interface = %self.name, %address, "Would update tunnel address");
        Ok(())
    }

    async fn update_peer(&self, peer: TunnelPeer) -> Result<(), TunnelError> {
        tracing::info!(interface = %self.name, peer = %peer.public_key, endpoint = %peer.endpoint, "Would update tunnel peer");
        Ok(())
    }

    async fn remove_peer(&self, public_key: &str) -> Result<(), TunnelError> {
        tracing::info!(interface = %self.name, %public_key, "Would remove tunnel peer");
        Ok(())
    }

    async fn close(&self) -> Result<(), TunnelError> {
        tracing::info!(interface = %self.name, "Would close tunnel interface");
        Ok(())
    }
}

struct LoggingRouteSink;

#[async_trait]
impl RouteSink for LoggingRouteSink {
    async fn update_routes(&self, serial: u64, routes: Vec<Route>) {
        tracing::debug!(serial, count = routes.len(), "Would update route table");
    }
}

struct LoggingDnsSink;

#[async_trait]
impl DnsSink for LoggingDnsSink {
    async fn update_dns(&self, serial: u64, dns: DnsConfig) {
        tracing::debug!(serial, nameservers = dns.nameservers.len(), "Would update DNS config");
    }
}
