//! DNS query resolution logic.
//!
//! Decides, per query, whether the override table answers it or it has
//! to be forwarded upstream. Transports handle the actual I/O, the
//! resolver handles decisions.

use std::sync::Arc;

use hickory_proto::op::{Header, Message};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{RData, Record, RecordType};
use rand::seq::SliceRandom;

use crate::overrides::OverrideTable;

/// TTL of every overridden answer, in seconds.
pub const OVERRIDE_TTL: u32 = 60;

/// Action to take for a DNS query.
#[derive(Debug)]
pub enum QueryAction {
    /// The override table answers the query with this response.
    Overridden(Message),
    /// Query should be forwarded to upstream.
    Forward,
}

impl QueryAction {
    /// Returns `true` for [`QueryAction::Overridden`].
    #[must_use]
    pub const fn is_overridden(&self) -> bool {
        matches!(self, Self::Overridden(_))
    }
}

/// Resolver handles DNS query processing decisions.
///
/// Holds only the immutable override table, so one instance is shared by
/// every in-flight query.
#[derive(Debug, Clone)]
pub struct Resolver {
    overrides: Arc<OverrideTable>,
}

impl Resolver {
    /// Create a new resolver answering from the given overrides.
    pub fn new(overrides: impl Into<Arc<OverrideTable>>) -> Self {
        Self {
            overrides: overrides.into(),
        }
    }

    /// Process a DNS query and decide what action to take.
    ///
    /// Only single-question A queries for an exactly matching name are
    /// overridden. Everything else, including queries with zero or several
    /// questions, is forwarded.
    pub fn process_query(&self, query: &Message) -> QueryAction {
        let [question] = query.queries() else {
            return QueryAction::Forward;
        };

        if question.query_type() != RecordType::A {
            return QueryAction::Forward;
        }

        let Some(ips) = self.overrides.get(&question.name().to_ascii()) else {
            return QueryAction::Forward;
        };

        let mut answers: Vec<Record> = ips
            .iter()
            .map(|ip| {
                let mut record =
                    Record::from_rdata(question.name().clone(), OVERRIDE_TTL, RData::A(A(*ip)));
                record.set_dns_class(question.query_class());
                record
            })
            .collect();
        answers.shuffle(&mut rand::rng());

        let mut response = Message::new();
        response
            .set_header(Header::response_from_request(query.header()))
            .add_query(question.clone())
            .add_answers(answers);

        QueryAction::Overridden(response)
    }

    /// Returns the number of overridden hostnames.
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }
}
