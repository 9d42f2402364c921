//! `EngineConfig`: loaded once from CLI flags / environment, validated, then
//! treated as immutable for the lifetime of the [`crate::Engine`].
use std::net::IpAddr;

use clap::Parser;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("local tunnel address must not be unspecified (0.0.0.0 / ::)")]
    UnspecifiedAddress,
    #[error("private key must not be empty")]
    EmptyPrivateKey,
}

/// Immutable-after-start engine configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "meshd", about = "Peer connection engine for the mesh VPN client")]
pub struct EngineConfig {
    /// Name of the kernel tunnel interface to create, e.g. `wt0`.
    #[arg(long, env = "MESH_INTERFACE", default_value = "wt0")]
    pub interface_name: String,

    /// Local tunnel address assigned by the coordinator.
    #[arg(long, env = "MESH_ADDRESS")]
    pub local_address: IpAddr,

    /// Local WireGuard-style private key (opaque to the engine).
    #[arg(long, env = "MESH_PRIVATE_KEY")]
    pub private_key: String,

    /// Port the tunnel driver listens on.
    #[arg(long, env = "MESH_LISTEN_PORT", default_value_t = 51820)]
    pub listen_port: u16,

    /// Port for the host-candidate UDP mux socket. `0` lets the OS choose.
    #[arg(long, env = "MESH_MUX_PORT", default_value_t = 0)]
    pub mux_port: u16,

    /// Port for the server-reflexive/TURN UDP mux socket. `0` lets the OS choose.
    #[arg(long, env = "MESH_SRFLX_PORT", default_value_t = 0)]
    pub srflx_port: u16,

    /// Substrings matched against local interface names; matching interfaces
    /// are never used to resolve a NAT mapping's internal address.
    #[arg(long = "interface-blacklist", env = "MESH_INTERFACE_BLACKLIST", value_delimiter = ',')]
    pub interface_blacklist: Vec<String>,

    /// Disables IPv6 candidate discovery, binding the UDP mux to `udp4` only.
    #[arg(long, env = "MESH_DISABLE_IPV6_DISCOVERY", default_value_t = false)]
    pub ipv6_discovery_disabled: bool,

    /// Pre-shared key mixed into every peer's tunnel config, if set.
    #[arg(long, env = "MESH_PRESHARED_KEY")]
    pub preshared_key: Option<String>,

    /// Private key for the embedded remote-shell server, if enabled.
    #[arg(long, env = "MESH_SHELL_PRIVATE_KEY")]
    pub shell_private_key: Option<String>,

    /// `EXTERNAL` or `EXTERNAL/INTERNAL` NAT mapping entries.
    #[arg(long = "nat-external-ip", env = "MESH_NAT_EXTERNAL_IPS", value_delimiter = ',')]
    pub nat_external_ips: Vec<String>,

    /// Overrides the DNS server address the tunnel interface advertises.
    #[arg(long, env = "MESH_DNS_SERVER")]
    pub dns_server: Option<IpAddr>,
}

impl EngineConfig {
    /// Runs the synchronous validation pass described in the ambient
    /// configuration spec: rejects an unspecified local address and an
    /// empty private key before `Engine::start` is ever called.
    ///
    /// Deliberately does *not* eagerly validate `nat_external_ips` - that
    /// list is parsed fresh, fail-closed, on every connection attempt (see
    /// `ice_mux::parse_nat_mappings`), matching the wire-level behavior the
    /// spec requires us to preserve.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_address.is_unspecified() {
            return Err(ConfigError::UnspecifiedAddress);
        }

        if self.private_key.trim().is_empty() {
            return Err(ConfigError::EmptyPrivateKey);
        }

        Ok(())
    }
}
