//! Client key resolution for per-client admission limits.
//!
//! The key is derived from request metadata in priority order:
//!   1. first entry of `X-Forwarded-For`
//!   2. `X-Real-IP`
//!   3. the transport peer address
//!
//! It is only used for counting connections and is never persisted.

use std::net::IpAddr;

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Key used when no source yields an address.
pub const UNKNOWN_CLIENT: &str = "unknown";

pub fn resolve_client_key(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer: Option<IpAddr>,
) -> String {
    let forwarded = forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    if let Some(ip) = real_ip.map(str::trim).filter(|v| !v.is_empty()) {
        return ip.to_string();
    }

    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const PEER: Option<IpAddr> = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)));

    #[test]
    fn forwarded_for_uses_first_hop() {
        let key = resolve_client_key(Some(" 203.0.113.7 , 10.0.0.1"), Some("198.51.100.2"), PEER);
        assert_eq!(key, "203.0.113.7");
    }

    #[test]
    fn real_ip_used_when_forwarded_for_blank() {
        assert_eq!(resolve_client_key(Some("  "), Some(" 198.51.100.2 "), PEER), "198.51.100.2");
        assert_eq!(resolve_client_key(None, Some("198.51.100.2"), PEER), "198.51.100.2");
    }

    #[test]
    fn peer_address_is_last_resort() {
        assert_eq!(resolve_client_key(None, None, PEER), "10.0.0.9");
        assert_eq!(resolve_client_key(Some(""), Some(""), None), UNKNOWN_CLIENT);
    }
}
