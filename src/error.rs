//! Error types.

use std::net::SocketAddr;

use thiserror::Error;

/// Result alias for dnstweak operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by dnstweak operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An override spec without the `=` separator.
    #[error("spec '{0}' does not contain '='")]
    InvalidSpec(String),

    /// An override spec with nothing before the `=`.
    #[error("spec '{0}' has an empty hostname")]
    EmptyHost(String),

    /// An address in an override spec that does not parse.
    #[error("can't parse ip address '{0}'")]
    InvalidIp(String),

    /// Overrides are answered with A records only.
    #[error("ip address '{0}' is IPv6; only IPv4 overrides are supported")]
    Ipv6Override(String),

    /// A listen or upstream address that does not parse.
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    /// Every bind candidate failed.
    #[error("no bindable listen address")]
    NoBindableAddress,

    /// Forwarding was attempted without an upstream resolver.
    #[error("no upstream resolver configured")]
    NoUpstream,

    /// The upstream resolver did not answer in time.
    #[error("upstream {0} timed out")]
    UpstreamTimeout(String),

    /// The upstream answered with a different transaction id.
    #[error("upstream {addr} answered id {got}, expected {expected}")]
    MismatchedResponse {
        /// Peer that sent the reply.
        addr: SocketAddr,
        /// Id of the query we sent.
        expected: u16,
        /// Id of the reply we got.
        got: u16,
    },

    /// Filesystem or socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// DNS message encoding or decoding failed.
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),
}

impl Error {
    /// Returns `true` if the underlying I/O error is `PermissionDenied`.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_detected() {
        let err = Error::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(err.is_permission_denied());
        assert!(!Error::NoUpstream.is_permission_denied());
    }

    #[test]
    fn spec_errors_mention_the_input() {
        assert_eq!(
            Error::InvalidSpec("example.com".into()).to_string(),
            "spec 'example.com' does not contain '='"
        );
    }
}
