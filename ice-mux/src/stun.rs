use std::net::SocketAddr;
use std::time::Duration;

use bytecodec::{DecodeExt as _, EncodeExt as _};
use stun_codec::rfc5389::attributes::{Software, XorMappedAddress};
use stun_codec::rfc5389::methods::BINDING;
use stun_codec::{Message, MessageClass, MessageDecoder, MessageEncoder, TransactionId};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::candidate::{Candidate, CandidateKind};

stun_codec::define_attribute_enums!(
    Attribute,
    AttributeDecoder,
    AttributeEncoder,
    [Software, XorMappedAddress]
);

#[derive(Debug, thiserror::Error)]
pub enum StunError {
    #[error("invalid STUN/TURN server url: {0}")]
    InvalidUrl(String),
    #[error("i/o error talking to STUN server: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out waiting for STUN response")]
    Timeout,
    #[error("failed to encode STUN binding request: {0}")]
    Encode(String),
    #[error("failed to decode STUN binding response: {0}")]
    Decode(String),
    #[error("STUN response carried no XOR-MAPPED-ADDRESS attribute")]
    MissingMappedAddress,
}

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Performs a single STUN binding request over `socket` to learn our
/// server-reflexive address, as seen by `stun_uri` (`stun:host[:port]`).
///
/// This is the entirety of the "ICE negotiation" the UDP mux performs on its
/// own behalf; everything else (host candidates, TURN relay allocation,
/// pair selection) is orchestrated by the per-peer connection state machine
/// in `mesh-engine` on top of this primitive.
pub async fn discover_reflexive_candidate(
    socket: &UdpSocket,
    stun_uri: &str,
) -> Result<Candidate, StunError> {
    let server_addr = resolve_stun_uri(stun_uri).await?;

    let transaction_id = TransactionId::new(rand::random());
    let request = Message::<Attribute>::new(MessageClass::Request, BINDING, transaction_id);

    let bytes = MessageEncoder::new()
        .encode_into_bytes(request)
        .map_err(|e| StunError::Encode(e.to_string()))?;

    socket.send_to(&bytes, server_addr).await?;

    let mut buf = [0u8; 512];
    let (len, _from) = timeout(RESPONSE_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .map_err(|_| StunError::Timeout)??;

    let decoded = MessageDecoder::<Attribute>::new()
        .decode_from_bytes(&buf[..len])
        .map_err(|e| StunError::Decode(e.to_string()))?
        .map_err(|broken| StunError::Decode(format!("{broken:?}")))?;

    let address = decoded
        .get_attribute::<XorMappedAddress>()
        .ok_or(StunError::MissingMappedAddress)?
        .address();

    Ok(Candidate {
        kind: CandidateKind::ServerReflexive,
        address,
    })
}

async fn resolve_stun_uri(uri: &str) -> Result<SocketAddr, StunError> {
    let without_scheme = uri
        .strip_prefix("stun:")
        .or_else(|| uri.strip_prefix("turn:"))
        .unwrap_or(uri);

    let with_port = if without_scheme.contains(':') {
        without_scheme.to_owned()
    } else {
        format!("{without_scheme}:3478")
    };

    if let Ok(addr) = with_port.parse::<SocketAddr>() {
        return Ok(addr);
    }

    tokio::net::lookup_host(&with_port)
        .await
        .map_err(|_| StunError::InvalidUrl(uri.to_owned()))?
        .next()
        .ok_or_else(|| StunError::InvalidUrl(uri.to_owned()))
}
