use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

/// Parses an address as it shows up in proxy headers and socket info:
/// optional port, optional brackets, and IPv4-mapped IPv6 unwrapped to IPv4.
pub fn clean_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let ip = raw
        .parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))?;
    Some(unmap(ip))
}

fn unmap(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// Best guess at the client's address: Cloudflare's header, then the first
/// valid `x-forwarded-for` hop, then the socket peer.
pub fn resolve(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    if let Some(ip) = header(headers, "cf-connecting-ip").and_then(clean_ip) {
        return ip;
    }
    if let Some(ip) =
        header(headers, "x-forwarded-for").and_then(|list| list.split(',').find_map(clean_ip))
    {
        return ip;
    }
    unmap(peer.ip())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
