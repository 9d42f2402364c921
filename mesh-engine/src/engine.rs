//! The engine: owns the peer-connection map, serializes coordinator and
//! signaling events against it, and runs the reconciliation algorithm that
//! turns a `NetworkMap` into a live set of tunnel connections.
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use mesh_proto::{HostConfig, ProtectedHostConfig, PublicKey, RemotePeerConfig, SyncResponse};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tun_iface::TunnelError;

use crate::collaborators::{CoordinatorStream, DnsSink, RouteSink, ShellServer, SignalingReceiver, SignalingSender};
use crate::config::EngineConfig;
use crate::peer::{PeerConnection, PeerConnectionConfig};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to bind UDP mux: {0}")]
    Mux(#[from] ice_mux::MuxError),
    #[error("tunnel driver error during start: {0}")]
    Tunnel(#[from] TunnelError),
    #[error("failed to remove peer {0} during shutdown")]
    ShutdownPeerRemoval(String),
}

/// Everything guarded by the engine's single serialization mutex: the
/// peer-connection map, the STUN/TURN snapshot every attempt reads from, and
/// the network-map bookkeeping needed to implement the reconciliation
/// algorithm's ordering guarantees.
pub struct Shared {
    pub(crate) peers: HashMap<PublicKey, Arc<PeerConnection>>,
    pub(crate) reconnect_handles: HashMap<PublicKey, JoinHandle<()>>,
    pub(crate) stun_turn_urls: Vec<String>,
    pub(crate) network_serial: u64,
    pub(crate) local_address: IpAddr,
    pub(crate) local_fqdn: String,
    pub(crate) shell_running: bool,
    pub(crate) offline_peers: Vec<RemotePeerConfig>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            peers: HashMap::new(),
            reconnect_handles: HashMap::new(),
            stun_turn_urls: Vec::new(),
            network_serial: 0,
            local_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_fqdn: String::new(),
            shell_running: false,
            offline_peers: Vec::new(),
        }
    }
}

/// Per-peer `PeerConnectionConfig` fields that come from `EngineConfig`
/// rather than from the coordinator's `RemotePeerConfig`, and so are the
/// same for every peer this engine creates.
#[derive(Debug, Clone)]
struct PeerDefaults {
    nat_external_ips: Vec<String>,
    interface_blacklist: Vec<String>,
    proxy_port: u16,
    preshared_key: Option<String>,
}

impl From<&EngineConfig> for PeerDefaults {
    fn from(config: &EngineConfig) -> Self {
        Self {
            nat_external_ips: config.nat_external_ips.clone(),
            interface_blacklist: config.interface_blacklist.clone(),
            proxy_port: config.listen_port,
            preshared_key: config.preshared_key.clone(),
        }
    }
}

/// The external collaborators `Engine::start` wires together. Grouped into
/// one struct so callers don't have to thread six constructor arguments.
pub struct EngineCollaborators {
    pub coordinator: Box<dyn CoordinatorStream>,
    pub signaling_rx: Box<dyn SignalingReceiver>,
    pub signaling_tx: Arc<dyn SignalingSender>,
    pub tunnel: Arc<dyn tun_iface::TunnelDriver>,
    pub shell: Option<Arc<dyn ShellServer>>,
    pub routes: Arc<dyn RouteSink>,
    pub dns: Arc<dyn DnsSink>,
}

pub struct Engine {
    local_key: PublicKey,
    config: EngineConfig,
    shared: Arc<Mutex<Shared>>,
    mux: Arc<ice_mux::UdpMux>,
    tunnel: Arc<dyn tun_iface::TunnelDriver>,
    signaling_tx: Arc<dyn SignalingSender>,
    shell: Option<Arc<dyn ShellServer>>,
    routes: Arc<dyn RouteSink>,
    dns: Arc<dyn DnsSink>,
    coordinator_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
    /// Tripped by either stream task when its upstream errors; the other
    /// task selects on it and returns too, so a single stream failure
    /// cancels both rather than leaving one half running against a peer
    /// the other has already given up on. Kept here so a supervising
    /// embedder can await `cancelled()` to know a restart is needed.
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl Engine {
    /// Binds the UDP mux, creates and configures the tunnel interface, then
    /// spawns the coordinator and signaling consumer tasks. On any failure
    /// up to that point the partially-created interface is torn down and the
    /// error is returned; `config` is assumed already `validate()`d.
    pub async fn start(
        local_key: PublicKey,
        config: EngineConfig,
        collaborators: EngineCollaborators,
    ) -> Result<Self, EngineError> {
        let mux = Arc::new(
            ice_mux::UdpMux::bind(config.mux_port, config.srflx_port, config.ipv6_discovery_disabled)
                .await?,
        );

        if let Err(error) = collaborators.tunnel.create(&config.interface_name).await {
            return Err(EngineError::Tunnel(error));
        }

        if let Err(error) = collaborators
            .tunnel
            .configure(&config.private_key, config.listen_port)
            .await
        {
            let _ = collaborators.tunnel.close().await;
            return Err(EngineError::Tunnel(error));
        }

        let shared = Arc::new(Mutex::new(Shared {
            local_address: config.local_address,
            ..Shared::default()
        }));

        let (cancel_tx, cancel_rx) = watch::channel(false);

        let coordinator_task = {
            let engine_shared = shared.clone();
            let mux = mux.clone();
            let tunnel = collaborators.tunnel.clone();
            let signaling_tx = collaborators.signaling_tx.clone();
            let shell = collaborators.shell.clone();
            let routes = collaborators.routes.clone();
            let dns = collaborators.dns.clone();
            let local_key = local_key.clone();
            let peer_defaults = PeerDefaults::from(&config);
            let mut coordinator = collaborators.coordinator;
            let cancel_tx = cancel_tx.clone();
            let mut cancel_rx = cancel_rx.clone();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel_rx.changed() => {
                            tracing::debug!("Coordinator task cancelled by signaling task");
                            return;
                        }
                        next = coordinator.recv() => match next {
                            Some(Ok(update)) => {
                                handle_sync(
                                    &engine_shared,
                                    &mux,
                                    &tunnel,
                                    &signaling_tx,
                                    shell.as_deref(),
                                    &routes,
                                    &dns,
                                    &local_key,
                                    &peer_defaults,
                                    update,
                                )
                                .await;
                            }
                            Some(Err(error)) => {
                                tracing::warn!(%error, "Coordinator stream error, cancelling engine");
                                let _ = cancel_tx.send(true);
                                return;
                            }
                            None => {
                                tracing::debug!("Coordinator stream ended");
                                return;
                            }
                        },
                    }
                }
            })
        };

        let dispatcher_task = crate::dispatcher::run_spawned(
            collaborators.signaling_rx,
            shared.clone(),
            cancel_tx.clone(),
            cancel_rx.clone(),
        );

        Ok(Self {
            local_key,
            config,
            shared,
            mux,
            tunnel: collaborators.tunnel,
            signaling_tx: collaborators.signaling_tx,
            shell: collaborators.shell,
            routes: collaborators.routes,
            dns: collaborators.dns,
            coordinator_task,
            dispatcher_task,
            cancel_tx,
            cancel_rx,
        })
    }

    /// Resolves once a stream task has tripped the shared cancellation
    /// signal after an upstream error, telling a supervising embedder a
    /// restart is needed. Never resolves on a clean `stop()`; that path is
    /// an intentional shutdown the owner already knows about.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    /// Removes every peer, waits ~500ms for the tunnel driver to drain their
    /// asynchronous removal, then tears down the tunnel interface and stream
    /// tasks. Safe to call more than once.
    pub async fn stop(&self) -> Result<(), EngineError> {
        self.coordinator_task.abort();
        self.dispatcher_task.abort();

        let (keys, handles) = {
            let mut shared = self.shared.lock().await;
            let keys: Vec<PublicKey> = shared.peers.keys().cloned().collect();
            shared.peers.clear();
            let handles: Vec<JoinHandle<()>> = shared.reconnect_handles.drain().map(|(_, h)| h).collect();
            (keys, handles)
        };

        for key in &keys {
            if let Err(error) = self.tunnel.remove_peer(&key.0).await {
                return Err(EngineError::ShutdownPeerRemoval(format!("{key}: {error}")));
            }
        }

        for handle in handles {
            handle.abort();
        }

        tokio::time::sleep(Duration::from_millis(500)).await;

        self.tunnel.close().await?;

        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local_key(&self) -> &PublicKey {
        &self.local_key
    }

    pub async fn network_serial(&self) -> u64 {
        self.shared.lock().await.network_serial
    }

    pub async fn peer_count(&self) -> usize {
        self.shared.lock().await.peers.len()
    }

    pub async fn peer_keys(&self) -> HashSet<PublicKey> {
        self.shared.lock().await.peers.keys().cloned().collect()
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_sync(
    shared_arc: &Arc<Mutex<Shared>>,
    mux: &Arc<ice_mux::UdpMux>,
    tunnel: &Arc<dyn tun_iface::TunnelDriver>,
    signaling_tx: &Arc<dyn SignalingSender>,
    shell: Option<&dyn ShellServer>,
    routes: &Arc<dyn RouteSink>,
    dns: &Arc<dyn DnsSink>,
    local_key: &PublicKey,
    peer_defaults: &PeerDefaults,
    update: SyncResponse,
) {
    let mut shared = shared_arc.lock().await;

    // Step 1: STUN/TURN refresh. An empty list means "no change", matching
    // the wire convention used for relay config heartbeats.
    if let Some(relay) = update.wiretrustee_config {
        let urls = relay_urls(&relay.stuns, &relay.turns);
        if !urls.is_empty() {
            shared.stun_turn_urls = urls;
            broadcast_conf(&shared);
        }
    }

    let Some(network_map) = update.network_map else {
        return;
    };

    // Step 2a: peer_config always applies, even under a stale serial.
    if let Some(peer_config) = &network_map.peer_config {
        if peer_config.address != shared.local_address {
            if let Err(error) = tunnel.update_addr(peer_config.address).await {
                tracing::warn!(%error, "Failed to update local tunnel address");
            } else {
                shared.local_address = peer_config.address;
            }
        }

        shared.local_fqdn = peer_config.fqdn.clone();

        let shell_enabled = peer_config
            .ssh_config
            .as_ref()
            .map(|c| c.shell_enabled)
            .unwrap_or(false);

        if let Some(shell) = shell {
            if shell_enabled && !shared.shell_running {
                if let Err(error) = shell.start().await {
                    tracing::warn!(%error, "Failed to start remote-shell server");
                } else {
                    shared.shell_running = true;
                }
            } else if !shell_enabled && shared.shell_running {
                if let Err(error) = shell.stop().await {
                    tracing::warn!(%error, "Failed to stop remote-shell server");
                } else {
                    shared.shell_running = false;
                }
            }
        }
    }

    // Step 2b: bulk fields (everything below) are dropped under a stale serial.
    if network_map.serial < shared.network_serial {
        tracing::debug!(
            serial = network_map.serial,
            current = shared.network_serial,
            "Dropping stale network map"
        );
        return;
    }

    // Step 2c: offline-peer status is replaced wholesale.
    shared.offline_peers = network_map.offline_peers.clone();

    // Step 2d: reconcile the peer set.
    if network_map.remote_peers_is_empty {
        remove_all_peers(&mut shared, tunnel).await;
    } else {
        reconcile_peers(
            &mut shared,
            shared_arc,
            mux,
            tunnel,
            signaling_tx,
            local_key,
            peer_defaults,
            &network_map.remote_peers,
        )
        .await;
    }

    // Step 2e: remote-shell authorized keys, only while the server is running.
    if shared.shell_running {
        if let Some(shell) = shell {
            for peer in &network_map.remote_peers {
                if let Some(shell_pub_key) = &peer.shell_pub_key {
                    if let Err(error) = shell.add_authorized_key(&peer.wg_pub_key.0, shell_pub_key).await {
                        tracing::warn!(%error, peer = %peer.wg_pub_key, "Failed to authorize remote-shell key");
                    }
                }
            }
        }
    }

    // Step 2f: routes and DNS, full replacement, keyed by serial.
    routes.update_routes(network_map.serial, network_map.routes).await;
    dns.update_dns(network_map.serial, network_map.dns_config).await;

    // Step 2g.
    shared.network_serial = network_map.serial;
}

fn relay_urls(stuns: &[HostConfig], turns: &[ProtectedHostConfig]) -> Vec<String> {
    stuns
        .iter()
        .map(|h| h.uri.clone())
        .chain(turns.iter().map(|t| t.uri.clone()))
        .collect()
}

fn broadcast_conf(shared: &Shared) {
    let urls = shared.stun_turn_urls.clone();
    for peer in shared.peers.values() {
        let peer = peer.clone();
        let urls = urls.clone();
        tokio::spawn(async move { peer.update_conf(urls).await });
    }
}

async fn remove_all_peers(shared: &mut Shared, tunnel: &Arc<dyn tun_iface::TunnelDriver>) {
    let keys: Vec<PublicKey> = shared.peers.keys().cloned().collect();
    for key in keys {
        close_and_forget_peer(shared, tunnel, &key).await;
    }
}

async fn close_and_forget_peer(shared: &mut Shared, tunnel: &Arc<dyn tun_iface::TunnelDriver>, key: &PublicKey) {
    if let Some(peer) = shared.peers.remove(key) {
        if let Err(error) = peer.close() {
            tracing::debug!(peer = %key, %error, "Peer already closed");
        }
    }

    if let Some(handle) = shared.reconnect_handles.remove(key) {
        handle.abort();
    }

    if let Err(error) = tunnel.remove_peer(&key.0).await {
        tracing::warn!(peer = %key, %error, "Failed to remove tunnel peer");
    }
}

#[allow(clippy::too_many_arguments)]
async fn reconcile_peers(
    shared: &mut Shared,
    shared_arc: &Arc<Mutex<Shared>>,
    mux: &Arc<ice_mux::UdpMux>,
    tunnel: &Arc<dyn tun_iface::TunnelDriver>,
    signaling_tx: &Arc<dyn SignalingSender>,
    local_key: &PublicKey,
    peer_defaults: &PeerDefaults,
    remote_peers: &[RemotePeerConfig],
) {
    let update_keys: HashSet<PublicKey> = remote_peers.iter().map(|p| p.wg_pub_key.clone()).collect();
    let current_keys: Vec<PublicKey> = shared.peers.keys().cloned().collect();

    let to_remove: Vec<PublicKey> = current_keys
        .into_iter()
        .filter(|k| !update_keys.contains(k))
        .collect();

    for key in &to_remove {
        close_and_forget_peer(shared, tunnel, key).await;
    }

    for remote in remote_peers {
        let allowed_ips_changed = shared
            .peers
            .get(&remote.wg_pub_key)
            .map(|existing| existing.allowed_ips_key() != remote.allowed_ips_key());

        match allowed_ips_changed {
            None => {
                create_peer(shared, shared_arc, mux, tunnel, signaling_tx, local_key, peer_defaults, remote).await
            }
            Some(true) => {
                close_and_forget_peer(shared, tunnel, &remote.wg_pub_key).await;
                create_peer(shared, shared_arc, mux, tunnel, signaling_tx, local_key, peer_defaults, remote).await;
            }
            Some(false) => {
                if let Some(existing) = shared.peers.get(&remote.wg_pub_key) {
                    existing.set_fqdn(remote.fqdn.clone()).await;
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn create_peer(
    shared: &mut Shared,
    shared_arc: &Arc<Mutex<Shared>>,
    mux: &Arc<ice_mux::UdpMux>,
    tunnel: &Arc<dyn tun_iface::TunnelDriver>,
    signaling_tx: &Arc<dyn SignalingSender>,
    local_key: &PublicKey,
    peer_defaults: &PeerDefaults,
    remote: &RemotePeerConfig,
) {
    let peer = Arc::new(PeerConnection::new(
        PeerConnectionConfig {
            local_key: local_key.clone(),
            remote_key: remote.wg_pub_key.clone(),
            allowed_ips: remote.allowed_ips.clone(),
            nat_external_ips: peer_defaults.nat_external_ips.clone(),
            interface_blacklist: peer_defaults.interface_blacklist.clone(),
            proxy_port: peer_defaults.proxy_port,
            preshared_key: peer_defaults.preshared_key.clone(),
        },
        mux.clone(),
        tunnel.clone(),
        signaling_tx.clone(),
        remote.fqdn.clone(),
    ));

    peer.update_conf(shared.stun_turn_urls.clone()).await;

    let handle = crate::reconnect::spawn(remote.wg_pub_key.clone(), peer.clone(), shared_arc.clone());

    shared.peers.insert(remote.wg_pub_key.clone(), peer);
    shared.reconnect_handles.insert(remote.wg_pub_key.clone(), handle);
}
