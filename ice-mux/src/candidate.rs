use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    Relay,
    /// Operator-configured NAT external-IP mapping rather than anything
    /// discovered via STUN/TURN. See [`crate::static_mapping_candidates`].
    StaticMapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub kind: CandidateKind,
    pub address: SocketAddr,
}
