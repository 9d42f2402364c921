//! The signaling dispatcher: the single consumer of the inbound signaling
//! stream, routing each message to the peer connection it names by
//! `remote_key`. Unknown peers are dropped with a warning rather than
//! treated as fatal, since a signaling message can race a peer's removal
//! during reconciliation.
use std::sync::Arc;

use mesh_proto::{Message, MessageType};
use tokio::sync::{watch, Mutex};

use crate::collaborators::SignalingReceiver;
use crate::engine::Shared;
use crate::peer::decode_remote_negotiation;
use crate::wire::decode_candidate;

/// Spawns [`run`] as its own task and returns its join handle.
pub fn run_spawned(
    receiver: Box<dyn SignalingReceiver>,
    shared: Arc<Mutex<Shared>>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(receiver, shared, cancel_tx, cancel_rx))
}

/// Runs until the inbound stream ends or errors, dispatching each message
/// under the engine mutex per §4.4. Also exits as soon as `cancel_rx`
/// reports the coordinator task tripped it, and trips `cancel_tx` itself on
/// a stream error so the coordinator task returns in turn.
pub async fn run(
    mut receiver: Box<dyn SignalingReceiver>,
    shared: Arc<Mutex<Shared>>,
    cancel_tx: watch::Sender<bool>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel_rx.changed() => {
                tracing::debug!("Dispatcher task cancelled by coordinator task");
                return;
            }
            next = receiver.recv() => match next {
                Some(Ok(msg)) => dispatch(msg, &shared).await,
                Some(Err(error)) => {
                    tracing::warn!(%error, "Signaling stream error, dispatcher exiting");
                    let _ = cancel_tx.send(true);
                    return;
                }
                None => {
                    tracing::debug!("Signaling stream ended, dispatcher exiting");
                    return;
                }
            },
        }
    }
}

async fn dispatch(msg: Message, shared: &Arc<Mutex<Shared>>) {
    let peer = {
        let guard = shared.lock().await;
        guard.peers.get(&msg.remote_key).cloned()
    };

    let Some(peer) = peer else {
        tracing::debug!(remote_key = %msg.remote_key, kind = ?msg.body.kind, "Dropping signaling message for unknown peer");
        return;
    };

    match msg.body.kind {
        MessageType::Offer => match decode_remote_negotiation(&msg) {
            Ok(negotiation) => peer.on_remote_offer(negotiation),
            Err(error) => tracing::warn!(remote_key = %msg.remote_key, %error, "Malformed OFFER payload"),
        },
        MessageType::Answer => match decode_remote_negotiation(&msg) {
            Ok(negotiation) => peer.on_remote_answer(negotiation),
            Err(error) => tracing::warn!(remote_key = %msg.remote_key, %error, "Malformed ANSWER payload"),
        },
        MessageType::Candidate => match decode_candidate(&msg.body.payload) {
            Ok(candidate) => peer.on_remote_candidate(candidate),
            Err(error) => tracing::warn!(remote_key = %msg.remote_key, %error, "Malformed CANDIDATE payload"),
        },
        MessageType::Mode => match msg.body.mode {
            Some(mode) => peer.on_mode_message(mode.direct),
            None => tracing::warn!(remote_key = %msg.remote_key, "MODE message missing its mode payload"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{PeerConnection, PeerConnectionConfig};
    use crate::testing::{FakeSignalingSender, FakeTunnelDriver};
    use ice_mux::UdpMux;
    use tokio::sync::mpsc;

    struct VecReceiver {
        rx: mpsc::UnboundedReceiver<Result<Message, crate::collaborators::CollaboratorError>>,
    }

    #[async_trait::async_trait]
    impl SignalingReceiver for VecReceiver {
        async fn recv(&mut self) -> Option<Result<Message, crate::collaborators::CollaboratorError>> {
            self.rx.recv().await
        }
    }

    async fn fake_peer() -> Arc<PeerConnection> {
        let mux = Arc::new(UdpMux::bind(0, 0, true).await.unwrap());
        let tunnel: Arc<dyn tun_iface::TunnelDriver> = Arc::new(FakeTunnelDriver::default());
        let signaling: Arc<dyn crate::collaborators::SignalingSender> =
            Arc::new(FakeSignalingSender::default());

        Arc::new(PeerConnection::new(
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
        ))
    }

    #[tokio::test]
    async fn mode_message_routes_to_the_named_peer() {
        let peer = fake_peer().await;
        let mut state = Shared::default();
        state.peers.insert(peer.remote_key().clone(), peer.clone());
        let shared = Arc::new(Mutex::new(state));

        let msg = Message {
            key: "local".into(),
            remote_key: "remote".into(),
            body: mesh_proto::MessageBody {
                kind: MessageType::Mode,
                payload: serde_json::to_string(&mesh_proto::ModePayload { direct: true }).unwrap(),
                wg_listen_port: None,
                netbird_version: None,
                features_supported: vec![],
                mode: Some(mesh_proto::ModePayload { direct: true }),
            },
        };

        dispatch(msg, &shared).await;
    }

    #[tokio::test]
    async fn unknown_peer_is_dropped_without_panicking() {
        let shared = Arc::new(Mutex::new(Shared::default()));

        let msg = Message {
            key: "local".into(),
            remote_key: "ghost".into(),
            body: mesh_proto::MessageBody {
                kind: MessageType::Mode,
                payload: serde_json::to_string(&mesh_proto::ModePayload { direct: false }).unwrap(),
                wg_listen_port: None,
                netbird_version: None,
                features_supported: vec![],
                mode: None,
            },
        };

        dispatch(msg, &shared).await;
    }

    #[tokio::test]
    async fn run_exits_when_the_stream_ends() {
        let (tx, receiver) = mpsc::unbounded_channel();
        drop(tx);
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);

        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            run(Box::new(VecReceiver { rx: receiver }), shared, cancel_tx, cancel_rx),
        )
        .await
        .expect("dispatcher should exit once the stream closes");
    }

    #[tokio::test]
    async fn run_exits_and_trips_cancellation_on_stream_error() {
        let (tx, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (cancel_tx, mut cancel_rx) = tokio::sync::watch::channel(false);

        tx.send(Err(crate::collaborators::CollaboratorError::Stream(
            "connection reset".into(),
        )))
        .unwrap();

        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            run(Box::new(VecReceiver { rx: receiver }), shared, cancel_tx, cancel_rx.clone()),
        )
        .await
        .expect("dispatcher should exit on stream error");

        assert!(*cancel_rx.borrow_and_update());
    }

    #[tokio::test]
    async fn run_exits_when_cancelled_by_the_coordinator_task() {
        let (_tx, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);

        cancel_tx.send(true).unwrap();

        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            run(Box::new(VecReceiver { rx: receiver }), shared, cancel_tx, cancel_rx),
        )
        .await
        .expect("dispatcher should exit once cancellation is observed");
    }
}
