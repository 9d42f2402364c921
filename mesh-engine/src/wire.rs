//! JSON payload shapes carried inside a [`mesh_proto::MessageBody::payload`]
//! string, shared between the peer connection (which sends them) and the
//! signaling dispatcher (which decodes them back).
use std::net::SocketAddr;

#[derive(serde::Serialize, serde::Deserialize)]
struct CandidatePayload {
    kind: String,
    address: SocketAddr,
}

pub fn encode_candidate(candidate: ice_mux::Candidate) -> String {
    let kind = match candidate.kind {
        ice_mux::CandidateKind::Host => "host",
        ice_mux::CandidateKind::ServerReflexive => "server_reflexive",
        ice_mux::CandidateKind::Relay => "relay",
        ice_mux::CandidateKind::StaticMapping => "static_mapping",
    };

    serde_json::to_string(&CandidatePayload {
        kind: kind.to_string(),
        address: candidate.address,
    })
    .expect("CandidatePayload always serializes")
}

pub fn decode_candidate(payload: &str) -> Result<ice_mux::Candidate, String> {
    let decoded: CandidatePayload = serde_json::from_str(payload).map_err(|e| e.to_string())?;

    let kind = match decoded.kind.as_str() {
        "host" => ice_mux::CandidateKind::Host,
        "server_reflexive" => ice_mux::CandidateKind::ServerReflexive,
        "relay" => ice_mux::CandidateKind::Relay,
        "static_mapping" => ice_mux::CandidateKind::StaticMapping,
        other => return Err(format!("unknown candidate kind {other}")),
    };

    Ok(ice_mux::Candidate {
        kind,
        address: decoded.address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_round_trips_through_wire_encoding() {
        let candidate = ice_mux::Candidate {
            kind: ice_mux::CandidateKind::ServerReflexive,
            address: "1.2.3.4:5000".parse().unwrap(),
        };

        let decoded = decode_candidate(&encode_candidate(candidate)).unwrap();
        assert_eq!(decoded, candidate);
    }
}
