use crate::error::ResolveError;
use async_trait::async_trait;
use std::net::IpAddr;
use tokio::net::lookup_host;
use tracing::debug;

/// Resolver maps a requested domain name to the IP address that will be dialed
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<IpAddr, ResolveError>;
}

/// SystemResolver asks the system resolver and keeps the first IPv4 address.
///
/// Names that only resolve to IPv6 addresses fail with
/// [`ResolveError::NoIpv4Found`]; there is no fallback to IPv6.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, name: &str) -> Result<IpAddr, ResolveError> {
        debug!("resolving {name}");

        let addrs = lookup_host((name, 0))
            .await
            .map_err(|source| ResolveError::Lookup {
                name: name.to_owned(),
                source,
            })?;

        let ip = first_ipv4(addrs.map(|addr| addr.ip()))
            .ok_or_else(|| ResolveError::NoIpv4Found(name.to_owned()))?;

        debug!("resolved {name} to {ip}");
        Ok(ip)
    }
}

/// first_ipv4 returns the first IPv4 address, unwrapping IPv4-mapped IPv6
fn first_ipv4(addrs: impl IntoIterator<Item = IpAddr>) -> Option<IpAddr> {
    addrs.into_iter().find_map(|ip| match ip {
        IpAddr::V4(_) => Some(ip),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4),
    })
}
