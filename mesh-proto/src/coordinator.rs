//! Types delivered by the coordinator stream.
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::PublicKey;

/// One pull from the coordinator stream.
///
/// Either field may be absent: a coordinator message can carry only relay
/// config, only a network map, both, or (rarely) neither as a keepalive.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncResponse {
    pub wiretrustee_config: Option<WiretrusteeConfig>,
    pub network_map: Option<NetworkMap>,
}

/// STUN/TURN relay configuration for the next negotiation attempt.
///
/// An empty `stuns`/`turns` list means "no change" to the engine, not
/// "clear the list" — see `Engine::handle_sync`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WiretrusteeConfig {
    pub stuns: Vec<HostConfig>,
    pub turns: Vec<ProtectedHostConfig>,
}

/// A STUN host. `uri` is a full ICE URL, e.g. `stun:stun.example.com:3478`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostConfig {
    pub uri: String,
}

/// A TURN host with credentials.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProtectedHostConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// The authoritative declarative snapshot of peers, routes and DNS.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NetworkMap {
    /// Monotonic version counter. Updates older than the engine's current
    /// serial are dropped wholesale, except `peer_config`.
    pub serial: u64,
    pub peer_config: Option<PeerConfig>,
    pub remote_peers: Vec<RemotePeerConfig>,
    /// Distinguishes "no peers right now" from "this message doesn't carry a
    /// peer update at all". Without it, a coordinator heartbeat with an empty
    /// `remote_peers` vec would look identical to "tear everything down".
    pub remote_peers_is_empty: bool,
    pub offline_peers: Vec<RemotePeerConfig>,
    pub routes: Vec<Route>,
    pub dns_config: DnsConfig,
}

/// Local-peer configuration embedded in a `NetworkMap`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PeerConfig {
    pub address: IpAddr,
    pub fqdn: String,
    pub ssh_config: Option<ShellConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ShellConfig {
    pub shell_enabled: bool,
    pub shell_priv_key: Option<String>,
}

/// A remote peer as advertised by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemotePeerConfig {
    pub wg_pub_key: PublicKey,
    pub allowed_ips: Vec<String>,
    pub fqdn: String,
    pub shell_pub_key: Option<String>,
}

impl RemotePeerConfig {
    /// Stable string used to detect an `allowed_ips` change between two
    /// network maps.
    pub fn allowed_ips_key(&self) -> String {
        self.allowed_ips.join(",")
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OfflinePeer {
    pub wg_pub_key: PublicKey,
    pub last_seen: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Route {
    pub id: String,
    pub network: String,
    pub metric: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DnsConfig {
    pub nameservers: Vec<IpAddr>,
    pub search_domains: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_ips_key_is_order_sensitive_and_stable() {
        let peer = RemotePeerConfig {
            wg_pub_key: "abc".into(),
            allowed_ips: vec!["10.0.0.2/32".into(), "10.0.0.3/32".into()],
            fqdn: "p1.mesh".into(),
            shell_pub_key: None,
        };

        assert_eq!(peer.allowed_ips_key(), "10.0.0.2/32,10.0.0.3/32");
    }

    #[test]
    fn sync_response_roundtrips_through_json() {
        let resp = SyncResponse {
            wiretrustee_config: Some(WiretrusteeConfig {
                stuns: vec![HostConfig {
                    uri: "stun:stun.example.com:3478".into(),
                }],
                turns: vec![],
            }),
            network_map: None,
        };

        let json = serde_json::to_string(&resp).expect("serialize");
        let back: SyncResponse = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(
            back.wiretrustee_config.unwrap().stuns[0].uri,
            "stun:stun.example.com:3478"
        );
    }
}
