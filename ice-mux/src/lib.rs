//! UDP multiplexing and ICE candidate gathering for the peer connection engine.
//!
//! This is deliberately not a general-purpose ICE agent: it gives each peer's
//! negotiation attempt host and server-reflexive candidates over two shared
//! UDP sockets, a NAT external-IP mapping parser, and the jitter/backoff
//! sampling the reconnect worker and per-peer timeout budget need.

mod candidate;
mod nat;
mod stun;
mod timing;

pub use candidate::{Candidate, CandidateKind};
pub use nat::{parse_nat_mappings, static_mapping_candidates, NatMappingError};
pub use stun::{discover_reflexive_candidate, StunError};
pub use timing::{jittered_sleep_duration, sample_attempt_timeout};

use std::net::SocketAddr;

use tokio::net::UdpSocket;

#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("failed to bind {purpose} UDP socket: {source}")]
    Bind {
        purpose: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// The two long-lived UDP sockets shared by every peer's ICE negotiation.
///
/// Opened once at engine start and closed last during shutdown, after every
/// peer connection has been removed.
pub struct UdpMux {
    host: UdpSocket,
    srflx: UdpSocket,
}

impl UdpMux {
    /// Binds the host and server-reflexive sockets.
    ///
    /// `port` of `0` lets the OS choose; `ipv6_discovery_disabled` restricts
    /// both sockets to `0.0.0.0` (`udp4`) instead of `[::]` (`udp`).
    pub async fn bind(
        host_port: u16,
        srflx_port: u16,
        ipv6_discovery_disabled: bool,
    ) -> Result<Self, MuxError> {
        let bind_addr = |port: u16| -> SocketAddr {
            if ipv6_discovery_disabled {
                (std::net::Ipv4Addr::UNSPECIFIED, port).into()
            } else {
                (std::net::Ipv6Addr::UNSPECIFIED, port).into()
            }
        };

        let host = UdpSocket::bind(bind_addr(host_port))
            .await
            .map_err(|source| MuxError::Bind {
                purpose: "host",
                source,
            })?;
        let srflx = UdpSocket::bind(bind_addr(srflx_port))
            .await
            .map_err(|source| MuxError::Bind {
                purpose: "server-reflexive",
                source,
            })?;

        tracing::debug!(
            host = %host.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            srflx = %srflx.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            "Bound UDP mux sockets"
        );

        Ok(Self { host, srflx })
    }

    pub fn host_local_addr(&self) -> std::io::Result<SocketAddr> {
        self.host.local_addr()
    }

    pub fn srflx_local_addr(&self) -> std::io::Result<SocketAddr> {
        self.srflx.local_addr()
    }

    /// The host candidate every ICE agent gathers first: our own local
    /// address on the shared socket.
    pub fn host_candidate(&self) -> std::io::Result<Candidate> {
        Ok(Candidate {
            kind: CandidateKind::Host,
            address: self.host.local_addr()?,
        })
    }

    /// The shared server-reflexive/TURN socket, handed to
    /// [`discover_reflexive_candidate`] by each peer's negotiation attempt.
    pub fn srflx_socket(&self) -> &UdpSocket {
        &self.srflx
    }

    /// The shared host-candidate socket.
    pub fn host_socket(&self) -> &UdpSocket {
        &self.host
    }
}
