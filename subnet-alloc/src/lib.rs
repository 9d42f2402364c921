//! Peer IP allocation within the mesh's aggregate CIDR.
//!
//! The mesh occupies a fixed `100.64.0.0/10` (carrier-grade NAT space, chosen
//! so it never collides with a user's own LAN). Each account gets a random
//! `/16` inside that aggregate; peer IPs are then handed out from within the
//! account's `/16`, tolerating holes left by departed peers rather than
//! compacting the assignment.
use std::collections::HashSet;
use std::net::Ipv4Addr;

use ip_network::Ipv4Network;
use rand::seq::SliceRandom as _;
use rand::Rng;

/// `100.64.0.0/10`, the aggregate every account's `/16` is carved out of.
pub const MESH_SUPERNET_ADDR: Ipv4Addr = Ipv4Addr::new(100, 64, 0, 0);
pub const MESH_SUPERNET_PREFIX: u8 = 10;
const ACCOUNT_PREFIX: u8 = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AllocatorError {
    #[error("no free address remains in the account's /16")]
    PreconditionFailed,
}

/// Picks a random `/16` inside the mesh's `/10` aggregate for a new account.
pub fn random_account_subnet(rng: &mut impl Rng) -> Ipv4Network {
    let supernet_base = u32::from(MESH_SUPERNET_ADDR);
    let subnet_count: u32 = 1 << (ACCOUNT_PREFIX - MESH_SUPERNET_PREFIX);
    let chosen_index: u32 = rng.gen_range(0..subnet_count);
    let subnet_base = supernet_base | (chosen_index << (32 - ACCOUNT_PREFIX));

    Ipv4Network::new(Ipv4Addr::from(subnet_base), ACCOUNT_PREFIX)
        .expect("a /16 carved out of a /10 by construction is always valid")
}

/// Allocates a single peer IP from `subnet`, excluding the network address,
/// the broadcast address, any address ending in `.0`, and every address
/// already in `taken`.
///
/// Departed peers leave holes in `taken` that later callers naturally reuse,
/// since the candidate set is recomputed from the full subnet every call.
pub fn allocate_peer_ip(
    subnet: Ipv4Network,
    taken: &HashSet<Ipv4Addr>,
    rng: &mut impl Rng,
) -> Result<Ipv4Addr, AllocatorError> {
    let candidates: Vec<Ipv4Addr> = subnet
        .hosts()
        .filter(|ip| ip.octets()[3] != 0)
        .filter(|ip| !taken.contains(ip))
        .collect();

    candidates
        .choose(rng)
        .copied()
        .ok_or(AllocatorError::PreconditionFailed)
}
