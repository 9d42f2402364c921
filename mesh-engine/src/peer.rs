//! The per-peer connection state machine: one ICE negotiation attempt per
//! call to [`PeerConnection::open`], hot-swappable STUN/TURN config, and a
//! `Close`/`AlreadyClosed` pair the engine can call idempotently.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ice_mux::{Candidate, UdpMux};
use mesh_proto::{FeatureBit, Message, MessageBody, MessageType, PublicKey};
use tokio::sync::{mpsc, Mutex, Notify};
use tun_iface::{TunnelDriver, TunnelPeer};

use crate::collaborators::SignalingSender;
use crate::credentials::IceCredentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum PeerConnectionError {
    #[error("connection was closed")]
    Closed,
    #[error("connection was already closed")]
    AlreadyClosed,
    #[error("ICE negotiation failed: {0}")]
    NegotiationFailed(String),
    #[error("negotiation timed out after {0:?}")]
    Timeout(Duration),
}

impl PeerConnectionError {
    /// Whether the reconnect worker should keep retrying after seeing this
    /// error. Only a forced [`PeerConnection::close`] is terminal.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PeerConnectionError::Closed)
    }
}

/// Credentials and listen port advertised by the remote side in an
/// OFFER/ANSWER.
#[derive(Debug, Clone)]
pub struct RemoteNegotiation {
    pub credentials: IceCredentials,
    pub wg_listen_port: Option<u16>,
    pub features: Vec<FeatureBit>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct NegotiationPayload {
    credentials: IceCredentials,
}

/// Decodes an incoming OFFER/ANSWER message's JSON payload into a
/// [`RemoteNegotiation`], for the signaling dispatcher to hand to the right
/// peer connection via `on_remote_offer`/`on_remote_answer`.
pub fn decode_remote_negotiation(msg: &Message) -> Result<RemoteNegotiation, String> {
    let payload: NegotiationPayload =
        serde_json::from_str(&msg.body.payload).map_err(|e| e.to_string())?;

    Ok(RemoteNegotiation {
        credentials: payload.credentials,
        wg_listen_port: msg.body.wg_listen_port,
        features: msg.body.features_supported.clone(),
    })
}

/// Static, per-attempt configuration for a single remote peer.
pub struct PeerConnectionConfig {
    pub local_key: PublicKey,
    pub remote_key: PublicKey,
    pub allowed_ips: Vec<String>,
    pub nat_external_ips: Vec<String>,
    pub interface_blacklist: Vec<String>,
    pub proxy_port: u16,
    pub preshared_key: Option<String>,
}

pub struct PeerConnection {
    local_key: PublicKey,
    remote_key: PublicKey,
    allowed_ips: Vec<String>,
    nat_external_ips: Vec<String>,
    interface_blacklist: Vec<String>,
    proxy_port: u16,
    preshared_key: Option<String>,

    mux: Arc<UdpMux>,
    tunnel: Arc<dyn TunnelDriver>,
    signaling: Arc<dyn SignalingSender>,

    state: Mutex<PeerState>,
    stun_turn_urls: Mutex<Vec<String>>,
    fqdn: Mutex<String>,
    direct_mode: AtomicBool,

    offers_tx: mpsc::UnboundedSender<RemoteNegotiation>,
    offers_rx: Mutex<mpsc::UnboundedReceiver<RemoteNegotiation>>,
    answers_tx: mpsc::UnboundedSender<RemoteNegotiation>,
    answers_rx: Mutex<mpsc::UnboundedReceiver<RemoteNegotiation>>,
    candidates_tx: mpsc::UnboundedSender<Candidate>,
    candidates_rx: Mutex<mpsc::UnboundedReceiver<Candidate>>,

    close_notify: Notify,
    closed: AtomicBool,
}

impl PeerConnection {
    pub fn new(
        config: PeerConnectionConfig,
        mux: Arc<UdpMux>,
        tunnel: Arc<dyn TunnelDriver>,
        signaling: Arc<dyn SignalingSender>,
        fqdn: String,
    ) -> Self {
        let (offers_tx, offers_rx) = mpsc::unbounded_channel();
        let (answers_tx, answers_rx) = mpsc::unbounded_channel();
        let (candidates_tx, candidates_rx) = mpsc::unbounded_channel();

        Self {
            local_key: config.local_key,
            remote_key: config.remote_key,
            allowed_ips: config.allowed_ips,
            nat_external_ips: config.nat_external_ips,
            interface_blacklist: config.interface_blacklist,
            proxy_port: config.proxy_port,
            preshared_key: config.preshared_key,
            mux,
            tunnel,
            signaling,
            state: Mutex::new(PeerState::Idle),
            stun_turn_urls: Mutex::new(Vec::new()),
            fqdn: Mutex::new(fqdn),
            direct_mode: AtomicBool::new(false),
            offers_tx,
            offers_rx: Mutex::new(offers_rx),
            answers_tx,
            answers_rx: Mutex::new(answers_rx),
            candidates_tx,
            candidates_rx: Mutex::new(candidates_rx),
            close_notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn remote_key(&self) -> &PublicKey {
        &self.remote_key
    }

    pub fn allowed_ips_key(&self) -> String {
        self.allowed_ips.join(",")
    }

    /// Whether the signaling transport is currently usable. The reconnect
    /// worker skips an iteration rather than opening a connection it has no
    /// way to negotiate over.
    pub fn is_signaling_ready(&self) -> bool {
        self.signaling.is_ready()
    }

    pub async fn state(&self) -> PeerState {
        *self.state.lock().await
    }

    pub async fn set_fqdn(&self, fqdn: String) {
        *self.fqdn.lock().await = fqdn;
    }

    /// Hot-swaps the STUN/TURN list used by the *next* negotiation attempt.
    pub async fn update_conf(&self, stun_turn_urls: Vec<String>) {
        *self.stun_turn_urls.lock().await = stun_turn_urls;
    }

    pub fn on_remote_offer(&self, neg: RemoteNegotiation) {
        let _ = self.offers_tx.send(neg);
    }

    pub fn on_remote_answer(&self, neg: RemoteNegotiation) {
        let _ = self.answers_tx.send(neg);
    }

    pub fn on_remote_candidate(&self, candidate: Candidate) {
        let _ = self.candidates_tx.send(candidate);
    }

    pub fn on_mode_message(&self, direct: bool) {
        self.direct_mode.store(direct, Ordering::Relaxed);
    }

    /// Forces exit from an in-flight [`PeerConnection::open`]. A second call
    /// returns [`PeerConnectionError::AlreadyClosed`], which the engine
    /// silently ignores.
    pub fn close(&self) -> Result<(), PeerConnectionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(PeerConnectionError::AlreadyClosed);
        }

        self.close_notify.notify_waiters();
        Ok(())
    }

    async fn set_state(&self, state: PeerState) {
        *self.state.lock().await = state;
    }

    /// Performs one full ICE negotiation attempt and, if it succeeds, blocks
    /// until the connection is closed. Always returns the terminal reason:
    /// `Closed` if this was a forced close, otherwise a retryable error.
    pub async fn open(&self) -> PeerConnectionError {
        if self.closed.load(Ordering::SeqCst) {
            return PeerConnectionError::Closed;
        }

        self.set_state(PeerState::Connecting).await;

        let credentials = IceCredentials::generate();
        let timeout_budget = ice_mux::sample_attempt_timeout();

        tracing::debug!(
            peer = %self.remote_key,
            timeout_ms = timeout_budget.as_millis(),
            "Starting ICE negotiation attempt"
        );

        let reason = tokio::select! {
            biased;
            _ = self.close_notify.notified() => PeerConnectionError::Closed,
            outcome = self.negotiate(credentials, timeout_budget) => match outcome {
                Err(e) => e,
                Ok(()) => {
                    self.set_state(PeerState::Connected).await;
                    self.close_notify.notified().await;
                    PeerConnectionError::Closed
                }
            },
        };

        self.set_state(if matches!(reason, PeerConnectionError::Closed) {
            PeerState::Closed
        } else {
            PeerState::Disconnected
        })
        .await;

        if let Err(error) = self.tunnel.remove_peer(&self.remote_key.0).await {
            tracing::debug!(peer = %self.remote_key, %error, "Tunnel peer removal on close failed (already gone?)");
        }

        reason
    }

    async fn negotiate(
        &self,
        credentials: IceCredentials,
        timeout_budget: Duration,
    ) -> Result<(), PeerConnectionError> {
        tokio::time::timeout(timeout_budget, self.negotiate_inner(credentials))
            .await
            .map_err(|_| PeerConnectionError::Timeout(timeout_budget))?
    }

    async fn negotiate_inner(&self, credentials: IceCredentials) -> Result<(), PeerConnectionError> {
        let host = self
            .mux
            .host_candidate()
            .map_err(|e| PeerConnectionError::NegotiationFailed(e.to_string()))?;

        let mut gathered = vec![host];

        let stun_turn_urls = self.stun_turn_urls.lock().await.clone();
        for url in &stun_turn_urls {
            match ice_mux::discover_reflexive_candidate(self.mux.srflx_socket(), url).await {
                Ok(candidate) => {
                    tracing::debug!(peer = %self.remote_key, %url, address = %candidate.address, "Gathered server-reflexive candidate");
                    gathered.push(candidate);
                }
                Err(error) => tracing::debug!(peer = %self.remote_key, %url, %error, "Candidate gathering failed for this server"),
            }
        }

        // Fail-closed: discarded wholesale if any entry in the config is invalid.
        gathered.extend(ice_mux::static_mapping_candidates(
            &self.nat_external_ips,
            &self.interface_blacklist,
            host.address.port(),
        ));

        let remote = self.exchange_offer_or_answer(&credentials).await?;

        // An operator-declared NAT mapping is authoritative and wins over
        // anything auto-discovered; failing that, prefer the server-reflexive
        // candidate (traverses NAT) over the bare host candidate, mirroring
        // how the remote side will pick ours.
        let best_local = gathered
            .iter()
            .rev()
            .find(|c| c.kind == ice_mux::CandidateKind::StaticMapping)
            .or_else(|| {
                gathered
                    .iter()
                    .rev()
                    .find(|c| c.kind == ice_mux::CandidateKind::ServerReflexive)
            })
            .or_else(|| gathered.first())
            .copied()
            .expect("at least the host candidate was gathered");

        self.send_candidate(best_local).await?;

        let selected = {
            let mut rx = self.candidates_rx.lock().await;
            rx.recv().await.ok_or_else(|| {
                PeerConnectionError::NegotiationFailed(
                    "signaling channel closed while awaiting a candidate".into(),
                )
            })?
        };

        self.tunnel
            .update_peer(TunnelPeer {
                public_key: self.remote_key.0.clone(),
                allowed_ips: self.allowed_ips.clone(),
                endpoint: selected.address,
                preshared_key: self.preshared_key.clone(),
                persistent_keepalive: Some(25),
            })
            .await
            .map_err(|e| PeerConnectionError::NegotiationFailed(e.to_string()))?;

        tracing::debug!(
            peer = %self.remote_key,
            remote_port = ?remote.wg_listen_port,
            endpoint = %selected.address,
            "Installed peer into tunnel interface"
        );

        Ok(())
    }

    /// If the remote side already sent us an OFFER before we got here
    /// (buffered in `offers_rx`), answer it; otherwise initiate with an
    /// OFFER of our own and wait for the ANSWER.
    async fn exchange_offer_or_answer(
        &self,
        credentials: &IceCredentials,
    ) -> Result<RemoteNegotiation, PeerConnectionError> {
        let buffered_offer = {
            let mut rx = self.offers_rx.lock().await;
            rx.try_recv().ok()
        };

        if let Some(offer) = buffered_offer {
            self.send_negotiation(MessageType::Answer, credentials).await?;
            return Ok(offer);
        }

        self.send_negotiation(MessageType::Offer, credentials).await?;

        let mut rx = self.answers_rx.lock().await;
        rx.recv().await.ok_or_else(|| {
            PeerConnectionError::NegotiationFailed(
                "signaling channel closed while awaiting an answer".into(),
            )
        })
    }

    async fn send_candidate(&self, candidate: Candidate) -> Result<(), PeerConnectionError> {
        let msg = Message {
            key: self.local_key.clone(),
            remote_key: self.remote_key.clone(),
            body: MessageBody {
                kind: MessageType::Candidate,
                payload: crate::wire::encode_candidate(candidate),
                wg_listen_port: None,
                netbird_version: None,
                features_supported: vec![],
                mode: None,
            },
        };

        self.signaling
            .send(msg)
            .await
            .map_err(|e| PeerConnectionError::NegotiationFailed(e.to_string()))
    }

    async fn send_negotiation(
        &self,
        kind: MessageType,
        credentials: &IceCredentials,
    ) -> Result<(), PeerConnectionError> {
        let payload = serde_json::to_string(&NegotiationPayload {
            credentials: credentials.clone(),
        })
        .expect("NegotiationPayload always serializes");

        let msg = Message {
            key: self.local_key.clone(),
            remote_key: self.remote_key.clone(),
            body: MessageBody {
                kind,
                payload,
                wg_listen_port: Some(self.proxy_port),
                netbird_version: None,
                features_supported: vec![FeatureBit::DirectCheck],
                mode: None,
            },
        };

        self.signaling
            .send(msg)
            .await
            .map_err(|e| PeerConnectionError::NegotiationFailed(e.to_string()))
    }
}
