//! Authority to socket address resolution.

use crate::error::ProxyError;
use async_trait::async_trait;
use log::debug;
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::time::{Duration, timeout};

pub const DEFAULT_PORT: &str = "443";
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Name resolution backend.
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Look up the addresses of `host`, in resolver order.
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Operating system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolve for SystemResolver {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Split `host:port` on the last colon, accepting bracketed IPv6 hosts.
///
/// Anything that is not a well-formed `host:port` comes back whole as the
/// host with the default port.
pub fn split_host_port(authority: &str) -> (&str, &str) {
    try_split_host_port(authority).unwrap_or((authority, DEFAULT_PORT))
}

fn try_split_host_port(authority: &str) -> Option<(&str, &str)> {
    let (host, port) = authority.rsplit_once(':')?;
    let host = match host.strip_prefix('[') {
        Some(bracketed) => bracketed.strip_suffix(']')?,
        // An unbracketed host with a colon is a bare IPv6 literal or garbage.
        None if host.contains(':') => return None,
        None => host,
    };
    if host.contains(|c: char| c == '[' || c == ']') {
        return None;
    }
    Some((host, port))
}

pub struct DestinationResolver<R = SystemResolver> {
    resolver: R,
    timeout: Duration,
}

impl DestinationResolver<SystemResolver> {
    pub fn new(timeout: Duration) -> Self {
        Self::with_resolver(SystemResolver, timeout)
    }
}

impl<R: Resolve> DestinationResolver<R> {
    pub fn with_resolver(resolver: R, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }

    /// Turn an authority into a connectable address.
    ///
    /// IP literals never touch the resolver. Names are looked up under the
    /// configured deadline and the first returned address wins.
    pub async fn resolve(&self, authority: &str) -> Result<SocketAddr, ProxyError> {
        let (host, port) = split_host_port(authority);

        let port: u16 = port.parse().map_err(|_| ProxyError::Resolve {
            host: host.to_string(),
            reason: format!("invalid port '{}'", port),
        })?;

        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        let resolve_error = |reason: String| ProxyError::Resolve {
            host: host.to_string(),
            reason,
        };

        let addrs = timeout(self.timeout, self.resolver.lookup(host))
            .await
            .map_err(|_| resolve_error(format!("lookup timed out after {:?}", self.timeout)))?
            .map_err(|e| resolve_error(e.to_string()))?;

        let ip = addrs
            .first()
            .copied()
            .ok_or_else(|| resolve_error(format!("no IPs found for host '{}'", host)))?;

        debug!("Resolved '{}' to {} ({} candidates)", host, ip, addrs.len());
        Ok(SocketAddr::new(ip, port))
    }
}
