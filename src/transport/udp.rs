//! UDP transport for DNS queries.
//!
//! Each datagram is handled in its own task, so a slow upstream exchange
//! never holds up other clients.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::handler::QueryHandler;

use super::MAX_DNS_PACKET_SIZE;

/// Shortest datagram that can hold a DNS header.
const DNS_HEADER_LEN: usize = 12;

/// UDP transport for the DNS responder.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    /// The address actually bound (resolves an ephemeral port).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve queries until `shutdown` flips to `true`.
    ///
    /// Returns `Ok(())` on shutdown (or when the shutdown sender is gone)
    /// and the error if the socket fails.
    pub async fn serve(
        self,
        handler: Arc<QueryHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> io::Result<()> {
        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

        loop {
            if *shutdown.borrow_and_update() {
                return Ok(());
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    // Sender gone: same as shutdown.
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                result = self.socket.recv_from(&mut buf) => {
                    let (len, src) = match result {
                        Ok(r) => r,
                        Err(e) if is_transient(&e) => {
                            tracing::debug!(error = %e, "UDP recv error");
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    if len < DNS_HEADER_LEN {
                        tracing::debug!(peer = %src, len, "dropping short datagram");
                        continue;
                    }

                    let packet = buf[..len].to_vec();
                    let socket = self.socket.clone();
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        if let Some(response) = handler.handle(&packet, src).await {
                            if let Err(e) = socket.send_to(&response, src).await {
                                tracing::warn!(peer = %src, error = %e, "UDP response error");
                            }
                        }
                    });
                }
            }
        }
    }
}

/// Errors a UDP socket can report for a single peer without being broken.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
