//! Per-query pipeline: decode, decide, forward, log, encode.

use std::net::SocketAddr;

use hickory_proto::op::Message;

use crate::attribution::ProcessAttributor;
use crate::resolver::{QueryAction, Resolver};
use crate::transport::QueryLogger;
use crate::upstream::Forwarder;

/// Everything a query task needs. Immutable, shared by all tasks.
#[derive(Debug, Clone)]
pub struct QueryHandler {
    resolver: Resolver,
    forwarder: Forwarder,
    attributor: Option<ProcessAttributor>,
}

impl QueryHandler {
    /// With `attributor` set, every query is attributed to a local process
    /// for the log line.
    pub fn new(
        resolver: Resolver,
        forwarder: Forwarder,
        attributor: Option<ProcessAttributor>,
    ) -> Self {
        Self {
            resolver,
            forwarder,
            attributor,
        }
    }

    /// Handle one raw datagram from `peer`.
    ///
    /// Returns the encoded reply, or `None` when the client gets no answer.
    pub async fn handle(&self, packet: &[u8], peer: SocketAddr) -> Option<Vec<u8>> {
        let query = match Message::from_vec(packet) {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "dropping undecodable query");
                return None;
            }
        };

        let client = self.client_label(peer).await;
        let response = self.respond(&query, &QueryLogger::new(peer, client)).await?;

        match response.to_vec() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "failed to encode response");
                None
            }
        }
    }

    /// Answer from overrides or upstream, logging the outcome.
    pub async fn respond(&self, query: &Message, logger: &QueryLogger) -> Option<Message> {
        if query.queries().len() != 1 {
            logger.anomaly(query);
            return self.forward(query).await;
        }

        let (response, overridden) = match self.resolver.process_query(query) {
            QueryAction::Overridden(response) => (Some(response), true),
            QueryAction::Forward => (self.forward(query).await, false),
        };

        logger.answered(query, response.as_ref(), overridden);
        response
    }

    async fn forward(&self, query: &Message) -> Option<Message> {
        match self.forwarder.forward(query).await {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::warn!(
                    upstream = %self.forwarder.upstream().map_or("-", |u| u.as_str()),
                    error = %e,
                    "forwarding failed"
                );
                None
            }
        }
    }

    async fn client_label(&self, peer: SocketAddr) -> Option<String> {
        let attributor = self.attributor.clone()?;
        tokio::task::spawn_blocking(move || attributor.attribute(peer))
            .await
            .ok()
            .flatten()
    }
}
