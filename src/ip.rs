//! Client address resolution with an explicit trusted-proxy list.
//!
//! Proxy headers are only believed when the TCP peer itself is a trusted
//! proxy. Everyone else is identified by their socket address.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

/// `true` when `entry` is a bare IP or an `addr/prefix` CIDR block.
pub fn is_valid_proxy_entry(entry: &str) -> bool {
    match entry.split_once('/') {
        Some((network, prefix)) => match (network.parse::<IpAddr>(), prefix.parse::<u8>()) {
            (Ok(IpAddr::V4(_)), Ok(p)) => p <= 32,
            (Ok(IpAddr::V6(_)), Ok(p)) => p <= 128,
            _ => false,
        },
        None => entry.parse::<IpAddr>().is_ok(),
    }
}

pub fn is_trusted_proxy(ip: &IpAddr, trusted: &[String]) -> bool {
    trusted.iter().any(|entry| {
        if entry.contains('/') {
            ip_in_cidr(ip, entry)
        } else {
            entry.parse::<IpAddr>().is_ok_and(|p| p == *ip)
        }
    })
}

fn ip_in_cidr(ip: &IpAddr, cidr: &str) -> bool {
    let Some((network, prefix)) = cidr.split_once('/') else {
        return false;
    };
    let (Ok(network), Ok(prefix)) = (network.parse::<IpAddr>(), prefix.parse::<u32>()) else {
        return false;
    };

    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(net)) if prefix <= 32 => {
            let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            (u32::from(*ip) & mask) == (u32::from(net) & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) if prefix <= 128 => {
            let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
            (u128::from(*ip) & mask) == (u128::from(net) & mask)
        }
        _ => false,
    }
}

/// The address a request should be attributed to.
///
/// Without a peer address there is nothing trustworthy to go on, so the
/// result is `None`. When the peer is a trusted proxy, `X-Forwarded-For` is
/// walked from the right and the first hop that is not itself a trusted
/// proxy wins; `X-Real-IP` is the fallback.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trusted: &[String]) -> Option<String> {
    let peer = peer?.ip();
    if trusted.is_empty() || !is_trusted_proxy(&peer, trusted) {
        return Some(peer.to_string());
    }

    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let hop = xff
            .rsplit(',')
            .map(str::trim)
            .filter_map(|h| h.parse::<IpAddr>().ok())
            .find(|h| !is_trusted_proxy(h, trusted));
        if let Some(hop) = hop {
            return Some(hop.to_string());
        }
    }

    if let Some(real_ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
    {
        return Some(real_ip.to_string());
    }

    Some(peer.to_string())
}
