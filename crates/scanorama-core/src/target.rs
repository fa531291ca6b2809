//! Target expansion and port specifications
//!
//! Discovery expands a CIDR into individual probe targets; profiles and scan
//! configs carry port sets in a compact text syntax. Both live here so the
//! engines and the repository agree on one parse.

use crate::error::{Error, Result};
use ipnetwork::IpNetwork;
use std::collections::BTreeSet;
use std::net::IpAddr;

/// Widest IPv4 prefix the expander accepts by default (a /16 is 65534 hosts)
pub const DEFAULT_MAX_PREFIX: u8 = 16;

/// Narrowest IPv6 prefix treated as expandable; anything wider is rejected
const IPV6_MIN_PREFIX: u8 = 120;

/// Expand a CIDR into probe targets.
///
/// Rules:
/// - `/32` yields the single address;
/// - `/31` yields both addresses (RFC 3021 point-to-point);
/// - anything else skips the network and broadcast addresses;
/// - prefixes wider than `max_prefix` are rejected;
/// - iteration is deterministic low-to-high and truncated at `max_hosts`.
pub fn expand_network(network: &str, max_prefix: u8, max_hosts: usize) -> Result<Vec<IpAddr>> {
    let net: IpNetwork = network
        .trim()
        .parse()
        .map_err(|e| Error::Validation(format!("invalid CIDR {:?}: {}", network, e)))?;

    match net {
        IpNetwork::V4(v4) => {
            if v4.prefix() < max_prefix {
                return Err(Error::Validation(format!(
                    "network {} too large: /{} is wider than the /{} limit",
                    network,
                    v4.prefix(),
                    max_prefix
                )));
            }

            let network_addr = v4.network();
            let broadcast_addr = v4.broadcast();
            let point_to_point = v4.prefix() >= 31;

            let targets: Vec<IpAddr> = v4
                .iter()
                .filter(|addr| point_to_point || (*addr != network_addr && *addr != broadcast_addr))
                .map(IpAddr::V4)
                .take(max_hosts)
                .collect();

            Ok(targets)
        }
        IpNetwork::V6(v6) => {
            if v6.prefix() < IPV6_MIN_PREFIX {
                return Err(Error::Validation(format!(
                    "IPv6 network {} too large: /{} is wider than the /{} limit",
                    network,
                    v6.prefix(),
                    IPV6_MIN_PREFIX
                )));
            }

            // No network/broadcast convention in IPv6.
            Ok(v6.iter().map(IpAddr::V6).take(max_hosts).collect())
        }
    }
}

/// A parsed port specification: single ports, inclusive ranges, comma lists.
///
/// Examples: `"22"`, `"1-1024"`, `"22,80,443,8000-8100"`. The expanded set
/// is deduplicated and ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    ports: BTreeSet<u16>,
}

impl PortSpec {
    /// Parse a port specification string.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::Validation("empty port specification".to_string()));
        }

        let mut ports = BTreeSet::new();
        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::Validation(format!(
                    "empty entry in port specification {:?}",
                    input
                )));
            }

            if let Some((lo, hi)) = part.split_once('-') {
                let start = parse_port(lo)?;
                let end = parse_port(hi)?;
                if end < start {
                    return Err(Error::Validation(format!(
                        "port range end {} is below start {}",
                        end, start
                    )));
                }
                ports.extend(start..=end);
            } else {
                ports.insert(parse_port(part)?);
            }
        }

        Ok(Self { ports })
    }

    /// Union of two specs; used to merge profile ports with request ports.
    pub fn union(&self, other: &PortSpec) -> PortSpec {
        let mut ports = self.ports.clone();
        ports.extend(other.ports.iter().copied());
        PortSpec { ports }
    }

    /// Expanded port set, ascending.
    pub fn ports(&self) -> Vec<u16> {
        self.ports.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

fn parse_port(s: &str) -> Result<u16> {
    let port: u16 = s
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("invalid port number: {:?}", s)))?;
    if port == 0 {
        return Err(Error::Validation("port 0 is invalid".to_string()));
    }
    Ok(port)
}

impl std::fmt::Display for PortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Re-compress consecutive runs back into ranges.
        let ports: Vec<u16> = self.ports();
        let mut parts = Vec::new();
        let mut i = 0;
        while i < ports.len() {
            let start = ports[i];
            let mut end = start;
            while i + 1 < ports.len() && ports[i + 1] == end + 1 {
                end = ports[i + 1];
                i += 1;
            }
            if start == end {
                parts.push(start.to_string());
            } else {
                parts.push(format!("{}-{}", start, end));
            }
            i += 1;
        }
        write!(f, "{}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_slash_30() {
        let targets = expand_network("10.0.0.0/30", DEFAULT_MAX_PREFIX, 100).unwrap();
        let strings: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
        assert_eq!(strings, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_expand_slash_32() {
        let targets = expand_network("127.0.0.1/32", DEFAULT_MAX_PREFIX, 100).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].to_string(), "127.0.0.1");
    }

    #[test]
    fn test_expand_slash_31_keeps_both() {
        let targets = expand_network("192.168.0.0/31", DEFAULT_MAX_PREFIX, 100).unwrap();
        let strings: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
        assert_eq!(strings, vec!["192.168.0.0", "192.168.0.1"]);
    }

    #[test]
    fn test_expand_skips_network_and_broadcast() {
        let targets = expand_network("10.1.2.0/24", DEFAULT_MAX_PREFIX, 1000).unwrap();
        assert_eq!(targets.len(), 254);
        assert_eq!(targets.first().unwrap().to_string(), "10.1.2.1");
        assert_eq!(targets.last().unwrap().to_string(), "10.1.2.254");
    }

    #[test]
    fn test_expand_truncates_at_max_hosts() {
        let targets = expand_network("10.1.2.0/24", DEFAULT_MAX_PREFIX, 10).unwrap();
        assert_eq!(targets.len(), 10);
        assert_eq!(targets[0].to_string(), "10.1.2.1");
        assert_eq!(targets[9].to_string(), "10.1.2.10");
    }

    #[test]
    fn test_expand_rejects_too_wide() {
        let err = expand_network("10.0.0.0/8", DEFAULT_MAX_PREFIX, 100).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_expand_prefix_limit_is_configurable() {
        assert!(expand_network("10.0.0.0/12", 8, 1).is_ok());
        assert!(expand_network("10.0.0.0/12", 16, 1).is_err());
    }

    #[test]
    fn test_expand_invalid_cidr() {
        assert!(matches!(
            expand_network("not-a-network", DEFAULT_MAX_PREFIX, 10),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_expand_sizes_match_prefix() {
        for (prefix, expected) in [(30u8, 2usize), (29, 6), (28, 14), (24, 254)] {
            let net = format!("172.16.0.0/{}", prefix);
            let targets = expand_network(&net, DEFAULT_MAX_PREFIX, usize::MAX).unwrap();
            assert_eq!(targets.len(), expected, "prefix /{}", prefix);
        }
    }

    #[test]
    fn test_expand_ipv6_single() {
        let targets = expand_network("::1/128", DEFAULT_MAX_PREFIX, 10).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].to_string(), "::1");
    }

    #[test]
    fn test_expand_ipv6_too_wide() {
        assert!(expand_network("2001:db8::/64", DEFAULT_MAX_PREFIX, 10).is_err());
    }

    #[test]
    fn test_port_spec_single() {
        let spec = PortSpec::parse("443").unwrap();
        assert_eq!(spec.ports(), vec![443]);
    }

    #[test]
    fn test_port_spec_range_and_list() {
        let spec = PortSpec::parse("22,80,8000-8002").unwrap();
        assert_eq!(spec.ports(), vec![22, 80, 8000, 8001, 8002]);
        assert_eq!(spec.len(), 5);
    }

    #[test]
    fn test_port_spec_dedups_overlap() {
        let spec = PortSpec::parse("80,79-81,80").unwrap();
        assert_eq!(spec.ports(), vec![79, 80, 81]);
    }

    #[test]
    fn test_port_spec_union() {
        let a = PortSpec::parse("22,80").unwrap();
        let b = PortSpec::parse("80,443").unwrap();
        assert_eq!(a.union(&b).ports(), vec![22, 80, 443]);
    }

    #[test]
    fn test_port_spec_rejects_bad_input() {
        assert!(PortSpec::parse("").is_err());
        assert!(PortSpec::parse("0").is_err());
        assert!(PortSpec::parse("80-22").is_err());
        assert!(PortSpec::parse("99999").is_err());
        assert!(PortSpec::parse("80,,443").is_err());
    }

    #[test]
    fn test_port_spec_display_recompresses() {
        let spec = PortSpec::parse("8002,8000,8001,22").unwrap();
        assert_eq!(spec.to_string(), "22,8000-8002");
    }
}
