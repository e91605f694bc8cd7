//! Listener lifecycle.
//!
//! Binds the first usable listen address, optionally splices the system
//! resolver file, serves queries, and undoes the splice on the way out.
//!
//! ```text
//! Unbound -> Bound -> Serving -> ShuttingDown -> Stopped
//!    ^                                              |
//!    +------ next candidate, if the socket died ----+
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::sync::watch;

use crate::attribution::ProcessAttributor;
use crate::error::{Error, Result};
use crate::handler::QueryHandler;
use crate::overrides::OverrideTable;
use crate::resolv_conf::{ResolvConf, ResolvConfGuard};
use crate::resolver::Resolver;
use crate::shutdown::{self, ShutdownHandle};
use crate::transport::udp::UdpTransport;
use crate::upstream::{DNS_PORT, Forwarder, Upstream};

/// Configuration for the DNS responder.
#[derive(Debug, Default)]
pub struct ProxyConfig {
    /// Hostnames answered locally.
    pub overrides: OverrideTable,
    /// Explicit listen address; probed when `None`.
    pub listen: Option<SocketAddr>,
    /// Upstream resolver; taken from the resolver file when `None`.
    pub upstream: Option<Upstream>,
    /// Resolver file to splice while serving, if any.
    pub resolv_conf: Option<ResolvConf>,
    /// Attribute queries to local processes in the log.
    pub attributor: Option<ProcessAttributor>,
}

/// Where the listener is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unbound,
    Bound,
    Serving,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unbound => "unbound",
            Self::Bound => "bound",
            Self::Serving => "serving",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Why a serve pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Shutdown was requested; do not try further candidates.
    Shutdown,
    /// The socket failed on its own; the next candidate may be tried.
    TransportClosed,
}

/// Parses `host:port` or a bare port (on loopback).
pub fn parse_listen_addr(s: &str) -> Result<SocketAddr> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    s.parse::<u16>()
        .map(|port| SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
        .map_err(|_| Error::InvalidAddress(s.to_string()))
}

/// `127.0.0.1:port` through `127.0.0.254:port`, then `127.0.0.1:0`.
pub fn auto_candidates(port: u16) -> Vec<SocketAddr> {
    (1..=254u8)
        .map(|i| SocketAddr::from((Ipv4Addr::new(127, 0, 0, i), port)))
        .chain(std::iter::once(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))))
        .collect()
}

/// The explicit address alone, or the auto-probe list on port 53.
pub fn bind_candidates(listen: Option<SocketAddr>) -> Vec<SocketAddr> {
    match listen {
        Some(addr) => vec![addr],
        None => auto_candidates(DNS_PORT),
    }
}

/// The DNS responder and the splice state it owns.
pub struct Proxy {
    resolver: Resolver,
    upstream: Option<Upstream>,
    attributor: Option<ProcessAttributor>,
    resolv_conf: Option<ResolvConfGuard>,
    candidates: VecDeque<SocketAddr>,
    explicit: bool,
    listener: Option<UdpTransport>,
    state: State,
    shutdown: ShutdownHandle,
    shutdown_rx: watch::Receiver<bool>,
}

impl Proxy {
    pub fn new(config: ProxyConfig) -> Self {
        let (shutdown, shutdown_rx) = ShutdownHandle::new();
        Self {
            resolver: Resolver::new(config.overrides),
            upstream: config.upstream,
            attributor: config.attributor,
            resolv_conf: config.resolv_conf.map(ResolvConfGuard::new),
            candidates: bind_candidates(config.listen).into(),
            explicit: config.listen.is_some(),
            listener: None,
            state: State::Unbound,
            shutdown,
            shutdown_rx,
        }
    }

    /// Replaces the bind candidates.
    #[must_use]
    pub fn with_candidates(mut self, candidates: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.candidates = candidates.into_iter().collect();
        self
    }

    /// Handle that makes [`serve`](Self::serve) return.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The upstream queries are forwarded to, once known.
    pub fn upstream(&self) -> Option<&Upstream> {
        self.upstream.as_ref()
    }

    fn set_state(&mut self, state: State) {
        tracing::debug!(from = %self.state, to = %state, "listener state");
        self.state = state;
    }

    /// Binds the next candidate that accepts, dropping those that fail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoBindableAddress`] once the candidates run out.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        while let Some(addr) = self.candidates.pop_front() {
            match UdpTransport::bind(addr).await {
                Ok(transport) => {
                    let local = transport.local_addr()?;
                    tracing::info!(addr = %local, "listening");
                    self.listener = Some(transport);
                    self.set_state(State::Bound);
                    return Ok(local);
                }
                Err(e) if self.explicit => {
                    tracing::warn!(addr = %addr, error = %e, "bind failed");
                }
                Err(e) => {
                    tracing::debug!(addr = %addr, error = %e, "bind failed, trying next address");
                }
            }
        }
        Err(Error::NoBindableAddress)
    }

    /// Serves on the bound socket until shutdown or socket failure.
    ///
    /// Splices the resolver file first if configured, and always restores
    /// it before returning.
    pub async fn serve(&mut self) -> Result<Exit> {
        let Some(transport) = self.listener.take() else {
            return Err(Error::NoBindableAddress);
        };
        let local = transport.local_addr()?;

        if self.shutdown.is_shutdown() {
            self.set_state(State::Stopped);
            return Ok(Exit::Shutdown);
        }

        if let Some(guard) = self.resolv_conf.as_mut() {
            if let Some(found) = guard.splice(local) {
                if self.upstream.is_none() {
                    tracing::info!(upstream = %found, "using upstream resolver from resolver file");
                    self.upstream = Some(found);
                }
            }
        }

        match &self.upstream {
            Some(upstream) => tracing::info!(upstream = %upstream, "forwarding unmatched queries"),
            None => tracing::warn!("no upstream resolver; unmatched queries will go unanswered"),
        }

        let handler = Arc::new(QueryHandler::new(
            self.resolver.clone(),
            Forwarder::new(self.upstream.clone()),
            self.attributor.clone(),
        ));

        self.set_state(State::Serving);
        let result = transport.serve(handler, self.shutdown_rx.clone()).await;

        self.set_state(State::ShuttingDown);
        if let Some(guard) = self.resolv_conf.as_mut() {
            guard.restore();
        }
        self.set_state(State::Stopped);

        match result {
            Ok(()) => Ok(Exit::Shutdown),
            Err(e) => {
                tracing::error!(addr = %local, error = %e, "listener failed");
                Ok(Exit::TransportClosed)
            }
        }
    }

    /// Binds and serves until shutdown, moving to the next candidate
    /// whenever a listener dies on its own.
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(overrides = self.resolver.override_count(), "dnstweak starts");
        loop {
            self.bind().await?;
            match self.serve().await? {
                Exit::Shutdown => return Ok(()),
                Exit::TransportClosed => self.set_state(State::Unbound),
            }
        }
    }
}

/// Run the responder until a termination signal arrives.
pub async fn run(config: ProxyConfig) -> Result<()> {
    let mut proxy = Proxy::new(config);
    let handle = proxy.shutdown_handle();

    tokio::spawn(async move {
        match shutdown::wait_for_signal().await {
            Ok(name) => tracing::info!(signal = name, "received signal, shutting down"),
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for signals");
                return;
            }
        }
        handle.shutdown();
    });

    proxy.run().await
}
