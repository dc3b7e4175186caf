use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tokio::net::lookup_host;

use super::ServerError;

/// Peer addresses permitted to connect. Only exact matches are admitted, so an
/// empty list refuses every peer.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    addresses: HashSet<IpAddr>,
}

impl AllowList {
    /// `127.0.0.1` and `::1`.
    pub fn loopback() -> Self {
        Self::from_addrs([
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ])
    }

    pub fn from_addrs<I: IntoIterator<Item = IpAddr>>(addrs: I) -> Self {
        Self {
            addresses: addrs.into_iter().map(normalize).collect(),
        }
    }

    /// Resolve host names and literal addresses into an allow-list.
    /// A host name contributes every address it resolves to.
    pub async fn resolve(hosts: &[String]) -> Result<Self, ServerError> {
        let mut addresses = HashSet::new();
        for host in hosts {
            if let Ok(ip) = host.parse::<IpAddr>() {
                addresses.insert(normalize(ip));
                continue;
            }

            let resolved = lookup_host((host.as_str(), 0))
                .await
                .map_err(|e| ServerError::Resolve(format!("{}: {}", host, e)))?;
            addresses.extend(resolved.map(|addr| normalize(addr.ip())));
        }
        Ok(Self { addresses })
    }

    pub fn is_allowed(&self, peer: IpAddr) -> bool {
        self.addresses.contains(&normalize(peer))
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// IPv4-mapped IPv6 peers (from dual-stack sockets) compare as IPv4.
fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}
