use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::candidate::{Candidate, CandidateKind};

#[derive(Debug, thiserror::Error)]
pub enum NatMappingError {
    #[error("'{0}' is not a valid external IP")]
    InvalidExternalIp(String),
    #[error("'{0}' is neither a valid IP nor a known, non-blacklisted local interface")]
    UnresolvableInternal(String),
    #[error("failed to enumerate local interfaces: {0}")]
    Enumerate(#[source] std::io::Error),
}

/// Parses `EngineConfig.nat_external_ips`, each entry either `EXT` or
/// `EXT/INT` where `INT` is an IP or a local interface name.
///
/// Fails closed: if *any* entry in the list is invalid, the whole list is
/// discarded and an empty `Vec` is returned, rather than the subset that
/// parsed. A caller that wants to know *why* can inspect the logged warning;
/// the return type intentionally carries no error so every call site gets
/// the fail-closed behavior for free.
pub fn parse_nat_mappings(entries: &[String], interface_blacklist: &[String]) -> Vec<String> {
    let mut parsed = Vec::with_capacity(entries.len());

    for entry in entries {
        match parse_one(entry, interface_blacklist) {
            Ok(mapping) => parsed.push(mapping),
            Err(error) => {
                tracing::warn!(%entry, %error, "Discarding entire NAT external-IP mapping list");
                return Vec::new();
            }
        }
    }

    parsed
}

/// Turns parsed NAT external-IP mappings into candidates the rest of ICE
/// negotiation can gather alongside the host and server-reflexive ones.
///
/// The NAT box is assumed to preserve the source port, so each mapping pairs
/// its external IP with our own `host_port` (the internal IP/interface half
/// of an `EXT/INT` entry only selects which local address the mapping
/// applies to during parsing; it plays no further part once parsing
/// succeeds).
pub fn static_mapping_candidates(
    entries: &[String],
    interface_blacklist: &[String],
    host_port: u16,
) -> Vec<Candidate> {
    parse_nat_mappings(entries, interface_blacklist)
        .iter()
        .filter_map(|mapping| {
            let ext_raw = mapping.split('/').next()?;
            let ext: IpAddr = ext_raw.parse().ok()?;

            Some(Candidate {
                kind: CandidateKind::StaticMapping,
                address: SocketAddr::new(ext, host_port),
            })
        })
        .collect()
}

fn parse_one(entry: &str, interface_blacklist: &[String]) -> Result<String, NatMappingError> {
    match entry.split_once('/') {
        None => {
            let ext: IpAddr = entry
                .parse()
                .map_err(|_| NatMappingError::InvalidExternalIp(entry.to_owned()))?;
            Ok(ext.to_string())
        }
        Some((ext_raw, int_raw)) => {
            let ext: IpAddr = ext_raw
                .parse()
                .map_err(|_| NatMappingError::InvalidExternalIp(ext_raw.to_owned()))?;

            let int = resolve_internal(int_raw, interface_blacklist)?;

            Ok(format!("{ext}/{int}"))
        }
    }
}

fn resolve_internal(raw: &str, interface_blacklist: &[String]) -> Result<IpAddr, NatMappingError> {
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Ok(ip);
    }

    first_ipv4_of_interface(raw, interface_blacklist)
        .ok_or_else(|| NatMappingError::UnresolvableInternal(raw.to_owned()))
}

/// Resolves a local interface name to its first non-blacklisted IPv4 address.
#[cfg(unix)]
fn first_ipv4_of_interface(name: &str, interface_blacklist: &[String]) -> Option<IpAddr> {
    if interface_blacklist
        .iter()
        .any(|blacklisted| name.contains(blacklisted.as_str()))
    {
        return None;
    }

    let addrs = nix::ifaddrs::getifaddrs().ok()?;

    addrs
        .filter(|iface| iface.interface_name == name)
        .find_map(|iface| {
            iface
                .address
                .as_ref()
                .and_then(|a| a.as_sockaddr_in())
                .map(|sin| IpAddr::V4(Ipv4Addr::from(sin.ip())))
        })
}

#[cfg(not(unix))]
fn first_ipv4_of_interface(_name: &str, _interface_blacklist: &[String]) -> Option<IpAddr> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_only_entry_parses() {
        let out = parse_nat_mappings(&["203.0.113.1".to_owned()], &[]);
        assert_eq!(out, vec!["203.0.113.1".to_owned()]);
    }

    #[test]
    fn external_with_internal_ip_parses() {
        let out = parse_nat_mappings(&["203.0.113.1/10.0.0.5".to_owned()], &[]);
        assert_eq!(out, vec!["203.0.113.1/10.0.0.5".to_owned()]);
    }

    #[test]
    fn any_invalid_entry_empties_the_whole_list() {
        let out = parse_nat_mappings(
            &["203.0.113.1".to_owned(), "not-an-ip/eth0".to_owned()],
            &[],
        );
        assert!(out.is_empty());
    }

    #[test]
    fn static_mapping_candidates_pair_external_ip_with_host_port() {
        let out = static_mapping_candidates(
            &["203.0.113.1".to_owned(), "203.0.113.2/10.0.0.5".to_owned()],
            &[],
            51820,
        );

        assert_eq!(
            out,
            vec![
                Candidate {
                    kind: CandidateKind::StaticMapping,
                    address: "203.0.113.1:51820".parse().unwrap(),
                },
                Candidate {
                    kind: CandidateKind::StaticMapping,
                    address: "203.0.113.2:51820".parse().unwrap(),
                },
            ]
        );
    }

    #[test]
    fn static_mapping_candidates_empty_when_any_entry_invalid() {
        let out = static_mapping_candidates(
            &["203.0.113.1".to_owned(), "not-an-ip".to_owned()],
            &[],
            51820,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn unresolvable_interface_name_empties_the_list() {
        let out = parse_nat_mappings(
            &["203.0.113.1/definitely-not-a-real-nic-name".to_owned()],
            &[],
        );
        assert!(out.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn garbage_internal_part_never_panics_and_always_empties(
            ext in "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}",
            junk in "\\PC{0,16}",
        ) {
            let entry = format!("{ext}/{junk}");
            let out = parse_nat_mappings(&[entry], &[]);
            // Either it happened to parse as a valid IP/interface (rare for
            // random junk) or the whole list was discarded - both are fine,
            // the property under test is "never panics".
            let _ = out;
        }
    }
}
