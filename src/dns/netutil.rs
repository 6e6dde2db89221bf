//! discovery and filtering of upstream resolvers

use std::net::Ipv4Addr;

/// Public resolvers used when the system configuration yields nothing
/// usable.
pub const PUBLIC_FALLBACK: [Ipv4Addr; 2] =
    [Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(1, 1, 1, 1)];

/// Nameservers configured on the local system, straight from
/// `/etc/resolv.conf`. Missing or unreadable configuration is treated the
/// same as an empty one.
pub fn system_nameservers() -> Vec<Ipv4Addr> {
    match std::fs::read_to_string("/etc/resolv.conf") {
        Ok(content) => parse_resolv_conf(&content),
        Err(_) => Vec::new(),
    }
}

pub fn parse_resolv_conf(content: &str) -> Vec<Ipv4Addr> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with(';'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("nameserver"), Some(addr)) => addr.parse::<Ipv4Addr>().ok(),
                _ => None,
            }
        })
        .collect()
}

/// Filter a candidate list down to resolvers this server can actually
/// delegate to. Loopback and unspecified addresses are useless as upstreams
/// (the local stub resolver usually points back at us); when nothing
/// survives, fall back to the public pair.
pub fn usable_upstreams(candidates: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
    let usable: Vec<Ipv4Addr> = candidates
        .iter()
        .filter(|addr| !addr.is_loopback() && !addr.is_unspecified())
        .cloned()
        .collect();

    if usable.is_empty() {
        PUBLIC_FALLBACK.to_vec()
    } else {
        usable
    }
}
