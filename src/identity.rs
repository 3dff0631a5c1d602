//! Client identity resolution.
//!
//! Reverse proxies inject private addresses for their internal hops, so the
//! identity is the first *public IPv4* address found in the configured client
//! IP header, `X-Real-Ip`, then `X-Forwarded-For`. When none qualifies the
//! transport peer address is used.

use http::{HeaderMap, HeaderName};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Canonical "real IP" header set by most reverse proxies.
pub const REAL_IP_HEADER: HeaderName = HeaderName::from_static("x-real-ip");

/// Canonical "forwarded-for" header.
pub const FORWARDED_FOR_HEADER: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Resolves the client identity for one request.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    client_ip_header: HeaderName,
}

impl IdentityResolver {
    pub fn new(client_ip_header: HeaderName) -> Self {
        Self { client_ip_header }
    }

    /// Return the identity for a request with the given headers and peer.
    pub fn resolve(&self, headers: &HeaderMap, peer: SocketAddr) -> String {
        let candidates = [&self.client_ip_header, &REAL_IP_HEADER, &FORWARDED_FOR_HEADER];

        candidates
            .into_iter()
            .filter_map(|name| headers.get(name))
            .filter_map(|value| value.to_str().ok())
            .find_map(acceptable_ipv4)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| peer.ip().to_canonical().to_string())
    }
}

/// Parse a header candidate, keeping it only if it is a public IPv4 address.
///
/// IPv4-mapped IPv6 literals (`::ffff:a.b.c.d`) count as IPv4.
fn acceptable_ipv4(value: &str) -> Option<Ipv4Addr> {
    let ip = match value.trim().parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(v6) => v6.to_ipv4_mapped()?,
    };
    // 10.0.0.0/8, 172.16.0.0/12 and 192.168.0.0/16
    (!ip.is_private()).then_some(ip)
}
