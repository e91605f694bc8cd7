//! Transport layer for the DNS responder.
//!
//! Receives DNS queries from clients over UDP and hands each one to a
//! [`QueryHandler`](crate::handler::QueryHandler). Also home to the
//! per-query log line.

pub mod udp;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use hickory_proto::op::Message;
use hickory_proto::rr::{Name, RData, Record};

/// One answer record, reduced to what the query log shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerSummary {
    /// A or AAAA record.
    Address(IpAddr),
    /// CNAME target.
    Alias(Name),
    /// PTR target.
    Pointer(Name),
    /// Anything else, rendered in full.
    Other(String),
}

impl From<&Record> for AnswerSummary {
    fn from(record: &Record) -> Self {
        match record.data() {
            RData::A(a) => Self::Address(IpAddr::V4(a.0)),
            RData::AAAA(aaaa) => Self::Address(IpAddr::V6(aaaa.0)),
            RData::CNAME(cname) => Self::Alias(cname.0.clone()),
            RData::PTR(ptr) => Self::Pointer(ptr.0.clone()),
            _ => Self::Other(record.to_string()),
        }
    }
}

impl fmt::Display for AnswerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(ip) => write!(f, "{ip}"),
            Self::Alias(name) | Self::Pointer(name) => f.write_str(&display_name(name)),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// Hostname without its trailing dot.
fn display_name(name: &Name) -> String {
    let ascii = name.to_ascii();
    match ascii.strip_suffix('.') {
        Some(s) => s.to_string(),
        None => ascii,
    }
}

/// Logger for DNS query events from one client.
pub struct QueryLogger {
    peer: SocketAddr,
    client: Option<String>,
}

impl QueryLogger {
    /// `client` is the attributed process label, if any.
    pub fn new(peer: SocketAddr, client: Option<String>) -> Self {
        Self { peer, client }
    }

    /// Logs a query with more or fewer than one question.
    pub fn anomaly(&self, query: &Message) {
        tracing::warn!(
            "{}: unsupported question set length: {} (expected 1): {:?}",
            self.prefix(),
            query.queries().len(),
            query.queries()
        );
    }

    /// Logs a served single-question query and its outcome.
    pub fn answered(&self, query: &Message, response: Option<&Message>, overridden: bool) {
        tracing::info!("{}", self.format_answered(query, response, overridden));
    }

    fn format_answered(&self, query: &Message, response: Option<&Message>, overridden: bool) -> String {
        let mut line = self.prefix();
        if let Some(question) = query.queries().first() {
            line.push_str(&format!(
                ": {} {}: ",
                question.query_type(),
                display_name(question.name())
            ));
        }

        match response {
            Some(resp) => {
                let answers: Vec<String> = resp
                    .answers()
                    .iter()
                    .map(|r| AnswerSummary::from(r).to_string())
                    .collect();
                line.push_str(&answers.join(","));
            }
            None => line.push_str("(error)"),
        }

        if overridden {
            line.push_str(" (overridden)");
        }
        line
    }

    fn prefix(&self) -> String {
        match &self.client {
            Some(client) => format!("{} ({client})", self.peer),
            None => self.peer.to_string(),
        }
    }
}
