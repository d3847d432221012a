//! Address helpers for tiers that must advertise how to reach them.
//!
//! Interface enumeration is left to the host platform; these helpers take
//! the candidate addresses as input.

use std::net::IpAddr;

/// True for addresses that are not routable on the public internet.
pub fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

/// First public IPv4 candidate, else first public IPv6 candidate.
pub fn public_ip(candidates: &[IpAddr]) -> Option<IpAddr> {
    let public = |want_v4: bool| {
        candidates
            .iter()
            .copied()
            .find(|ip| ip.is_ipv4() == want_v4 && !is_private(ip))
    };
    public(true).or_else(|| public(false))
}

/// Name under which this host is reachable from outside.
///
/// Returns `hostname` when it resolves to at least one public address, since
/// that is likely human readable; otherwise falls back to [`public_ip`].
/// Resolution errors are treated like an unresolvable hostname.
pub async fn server_name(hostname: &str, candidates: &[IpAddr]) -> Option<String> {
    match tokio::net::lookup_host((hostname, 0)).await {
        Ok(resolved) => {
            let resolved: Vec<IpAddr> = resolved.map(|addr| addr.ip()).collect();
            if resolved.iter().any(|ip| !is_private(ip)) {
                return Some(hostname.to_string());
            }
        }
        Err(e) => {
            tracing::debug!(hostname, error = %e, "hostname did not resolve");
        }
    }
    public_ip(candidates).map(|ip| ip.to_string())
}

/// Every non-loopback candidate other than `host` itself.
pub fn server_addresses(candidates: &[IpAddr], host: Option<&str>) -> Vec<IpAddr> {
    candidates
        .iter()
        .copied()
        .filter(|ip| !ip.is_loopback())
        .filter(|ip| host.map_or(true, |host| ip.to_string() != host))
        .collect()
}
