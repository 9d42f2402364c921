//! The reconnect worker: one `tokio::spawn`ed task per peer, looping
//! `PeerConnection::open` until a forced close or its entry disappears from
//! the engine's peer map, with jittered backoff between attempts.
use std::sync::Arc;

use mesh_proto::PublicKey;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::engine::Shared;
use crate::peer::{PeerConnection, PeerConnectionError};

/// Spawns the reconnect loop for `remote_key` and returns its join handle so
/// the engine can await it during shutdown.
pub fn spawn(
    remote_key: PublicKey,
    peer: Arc<PeerConnection>,
    shared: Arc<Mutex<Shared>>,
) -> JoinHandle<()> {
    tokio::spawn(async move { run(remote_key, peer, shared).await })
}

async fn run(remote_key: PublicKey, peer: Arc<PeerConnection>, shared: Arc<Mutex<Shared>>) {
    loop {
        tokio::time::sleep(ice_mux::jittered_sleep_duration()).await;

        if !shared.lock().await.peers.contains_key(&remote_key) {
            tracing::debug!(peer = %remote_key, "Reconnect worker exiting: peer removed from engine");
            return;
        }

        if !peer.is_signaling_ready() {
            tracing::debug!(peer = %remote_key, "Signaling not ready, skipping this attempt");
            continue;
        }

        let stun_turn_urls = shared.lock().await.stun_turn_urls.clone();
        peer.update_conf(stun_turn_urls).await;

        let reason = peer.open().await;

        match reason {
            PeerConnectionError::Closed => {
                tracing::debug!(peer = %remote_key, "Reconnect worker exiting: connection closed");
                return;
            }
            retryable => {
                tracing::debug!(peer = %remote_key, error = %retryable, "Negotiation attempt failed, will retry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::SignalingSender;
    use crate::engine::Shared;
    use crate::peer::PeerConnectionConfig;
    use crate::testing::{FakeSignalingSender, FakeTunnelDriver};
    use ice_mux::UdpMux;
    use std::collections::HashMap;

    async fn fake_peer_and_shared() -> (Arc<PeerConnection>, Arc<Mutex<Shared>>) {
        let mux = Arc::new(UdpMux::bind(0, 0, true).await.unwrap());
        let tunnel: Arc<dyn tun_iface::TunnelDriver> = Arc::new(FakeTunnelDriver::default());
        let fake_signaling = Arc::new(FakeSignalingSender::default());
        fake_signaling.set_ready(true);
        let signaling: Arc<dyn SignalingSender> = fake_signaling;

        let peer = Arc::new(PeerConnection::new(
            PeerConnectionConfig {
                local_key: "local".into(),
                remote_key: "remote".into(),
                allowed_ips: vec!["10.0.0.2/32".into()],
                nat_external_ips: vec![],
                interface_blacklist: vec![],
                proxy_port: 51820,
                preshared_key: None,
            },
            mux,
            tunnel,
            signaling,
            "peer.mesh".into(),
        ));

        let shared = Arc::new(Mutex::new(Shared::default()));
        shared.lock().await.peers.insert(peer.remote_key().clone(), peer.clone());

        (peer, shared)
    }

    #[tokio::test]
    async fn worker_exits_once_peer_entry_is_removed() {
        let (peer, shared) = fake_peer_and_shared().await;
        shared.lock().await.peers.remove(peer.remote_key());

        let handle = spawn(peer.remote_key().clone(), peer, shared);

        tokio::time::timeout(std::time::Duration::from_secs(3), handle)
            .await
            .expect("worker should exit once its entry disappears")
            .expect("worker task should not panic");
    }

    #[tokio::test]
    async fn worker_exits_promptly_after_close() {
        let (peer, shared) = fake_peer_and_shared().await;
        peer.close().unwrap();

        let handle = spawn(peer.remote_key().clone(), peer, shared);

        tokio::time::timeout(std::time::Duration::from_secs(3), handle)
            .await
            .expect("worker should exit promptly")
            .expect("worker task should not panic");
    }

    #[tokio::test]
    async fn not_ready_signaling_skips_without_calling_open() {
        let mux = Arc::new(UdpMux::bind(0, 0, true).await.unwrap());
        let tunnel: Arc<dyn tun_iface::TunnelDriver> = Arc::new(FakeTunnelDriver::default());
        let fake_signaling = Arc::new(FakeSignalingSender::default());
        fake_signaling.set_ready(false);
        let signaling: Arc<dyn SignalingSender> = fake_signaling;

        let peer = Arc::new(PeerConnection::new(
            PeerConnectionConfig {
                local_key: "local".into(),
                remote_key: "remote".into(),
                allowed_ips: vec!["10.0.0.2/32".into()],
                nat_external_ips: vec![],
                interface_blacklist: vec![],
                proxy_port: 51820,
                preshared_key: None,
            },
            mux,
            tunnel,
            signaling,
            "peer.mesh".into(),
        ));

        let mut shared_state = Shared::default();
        shared_state.peers.insert(peer.remote_key().clone(), peer.clone());
        let shared = Arc::new(Mutex::new(shared_state));

        let handle = spawn(peer.remote_key().clone(), peer.clone(), shared.clone());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(peer.state().await == crate::peer::PeerState::Idle, "open() must never run while signaling is not ready");
        shared.lock().await.peers.remove(peer.remote_key());

        tokio::time::timeout(std::time::Duration::from_secs(3), handle)
            .await
            .expect("worker should exit once removed from the peer map")
            .expect("worker task should not panic");
    }
}
