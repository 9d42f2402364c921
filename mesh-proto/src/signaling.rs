//! Types exchanged over the bidirectional signaling channel.
use serde::{Deserialize, Serialize};

use crate::PublicKey;

/// An envelope addressed from one peer to another.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub key: PublicKey,
    pub remote_key: PublicKey,
    pub body: MessageBody,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageBody {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub payload: String,
    pub wg_listen_port: Option<u16>,
    pub netbird_version: Option<String>,
    #[serde(default)]
    pub features_supported: Vec<FeatureBit>,
    pub mode: Option<ModePayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Offer,
    Answer,
    Candidate,
    Mode,
}

/// Feature bits a peer can advertise in an OFFER/ANSWER. Only one is defined
/// today; the enum exists so new bits don't require a wire-format break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureBit {
    DirectCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModePayload {
    pub direct: bool,
}

impl MessageBody {
    pub fn supports(&self, bit: FeatureBit) -> bool {
        self.features_supported.contains(&bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_serializes_uppercase() {
        let json = serde_json::to_string(&MessageType::Candidate).unwrap();
        assert_eq!(json, "\"CANDIDATE\"");
    }

    #[test]
    fn supports_checks_feature_bits() {
        let body = MessageBody {
            kind: MessageType::Offer,
            payload: String::new(),
            wg_listen_port: None,
            netbird_version: None,
            features_supported: vec![FeatureBit::DirectCheck],
            mode: None,
        };

        assert!(body.supports(FeatureBit::DirectCheck));
    }
}
