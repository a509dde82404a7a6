//! Client identity resolution.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use ipnet::IpNet;

use crate::config::ServerConfig;

/// Identity used when no peer address is available.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derives the client identity a request is limited under.
///
/// The peer address is used unless forwarding headers are trusted and the
/// peer is inside one of the trusted proxy ranges. `X-Forwarded-For` is then
/// walked from the right, skipping trusted hops. A hop that is not an address
/// discards the header, and `X-Real-IP` is the fallback.
#[derive(Debug, Clone, Default)]
pub struct ClientResolver {
    trust_forwarded_headers: bool,
    trusted_proxies: Vec<IpNet>,
}

impl ClientResolver {
    pub fn new(trust_forwarded_headers: bool, trusted_proxies: Vec<IpNet>) -> Self {
        Self {
            trust_forwarded_headers,
            trusted_proxies: trusted_proxies.into_iter().map(canonical_net).collect(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.trust_forwarded_headers, config.trusted_proxies.clone())
    }

    /// Resolve the client identity for a request.
    pub fn resolve(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let peer_ip = peer.map(|addr| addr.ip().to_canonical());

        if self.trust_forwarded_headers {
            if let Some(proxy) = peer_ip.filter(|ip| self.is_trusted(ip)) {
                if let Some(client) = self.forwarded_client(headers) {
                    return client.to_string();
                }
                return proxy.to_string();
            }
        }

        peer_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }

    fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.trusted_proxies.iter().any(|net| net.contains(ip))
    }

    fn forwarded_client(&self, headers: &HeaderMap) -> Option<IpAddr> {
        self.forwarded_for(headers).or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<IpAddr>().ok())
                .map(|ip| ip.to_canonical())
        })
    }

    /// Right-most untrusted `X-Forwarded-For` hop, or the left-most hop when
    /// every hop is trusted.
    fn forwarded_for(&self, headers: &HeaderMap) -> Option<IpAddr> {
        let hops: Vec<&str> = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .collect();

        for (i, hop) in hops.iter().enumerate().rev() {
            let ip = hop.parse::<IpAddr>().ok()?.to_canonical();
            if i == 0 || !self.is_trusted(&ip) {
                return Some(ip);
            }
        }
        None
    }
}

/// Map an IPv4-mapped IPv6 host entry onto its IPv4 form.
fn canonical_net(net: IpNet) -> IpNet {
    match net {
        IpNet::V6(v6) if v6.prefix_len() == 128 => {
            IpNet::from(IpAddr::V6(v6.addr()).to_canonical())
        }
        other => other,
    }
}
