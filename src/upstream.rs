//! Forwarding of unmatched queries to the upstream resolver.
//!
//! One request, one reply: no retries, and no timeout beyond the usual
//! two-second DNS client default.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use hickory_proto::op::Message;
use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::transport::MAX_DNS_PACKET_SIZE;

/// Default DNS port, used when an upstream omits one.
pub const DNS_PORT: u16 = 53;

/// Transport default for a single upstream exchange.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upstream resolver target, always in `host:port` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    target: String,
}

impl Upstream {
    /// Upstream at `ip` on the standard DNS port.
    #[must_use]
    pub fn from_ip(ip: IpAddr) -> Self {
        Self {
            target: SocketAddr::new(ip, DNS_PORT).to_string(),
        }
    }

    /// The `host:port` string handed to the socket layer.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.target
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host(self.target.as_str())
            .await?
            .next()
            .ok_or_else(|| Error::InvalidAddress(self.target.clone()))
    }
}

impl FromStr for Upstream {
    type Err = Error;

    /// Accepts `ip`, `ip:port`, `[v6]:port`, `host` or `host:port`.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self {
                target: addr.to_string(),
            });
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Self::from_ip(ip));
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(Self {
                target: s.to_string(),
            }),
            Some(_) => Err(Error::InvalidAddress(s.to_string())),
            None if s.is_empty() => Err(Error::InvalidAddress(s.to_string())),
            None => Ok(Self {
                target: format!("{s}:{DNS_PORT}"),
            }),
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.target)
    }
}

/// Relays queries to a single upstream resolver.
///
/// Stateless between calls: every exchange uses its own socket, so one
/// forwarder is shared by all query tasks.
#[derive(Debug, Clone)]
pub struct Forwarder {
    upstream: Option<Upstream>,
    timeout: Duration,
}

impl Forwarder {
    /// Create a forwarder. With no upstream every forward fails.
    #[must_use]
    pub const fn new(upstream: Option<Upstream>) -> Self {
        Self {
            upstream,
            timeout: EXCHANGE_TIMEOUT,
        }
    }

    /// Overrides the exchange timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The configured upstream, if any.
    #[must_use]
    pub const fn upstream(&self) -> Option<&Upstream> {
        self.upstream.as_ref()
    }

    /// Send `query` upstream and wait for the matching reply.
    pub async fn forward(&self, query: &Message) -> Result<Message> {
        let upstream = self.upstream.as_ref().ok_or(Error::NoUpstream)?;
        let addr = upstream.resolve().await?;

        let local: SocketAddr = if addr.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await?;
        socket.send(&query.to_vec()?).await?;

        let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];
        let len = tokio::time::timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| Error::UpstreamTimeout(upstream.to_string()))??;

        let reply = Message::from_vec(&buf[..len])?;
        if reply.id() != query.id() {
            return Err(Error::MismatchedResponse {
                addr,
                expected: query.id(),
                got: reply.id(),
            });
        }

        Ok(reply)
    }
}
