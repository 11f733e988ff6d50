//! Events, ephemeral events and append criteria (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::EventReference;
use crate::query::{EventQuery, Matchable};
use crate::stream::EventStreamId;
use crate::tag::TagSet;

/// A pre-commit event value: no reference, stream, or timestamp yet
/// (spec.md §3 "EphemeralEvent").
///
/// `data` is generic over the domain payload type rather than a fixed opaque
/// blob — the concrete payload is whatever the caller's `Codec` (see
/// `dcb-codec`) knows how to round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralEvent<D> {
    pub event_type: String,
    pub data: D,
    pub tags: TagSet,
    /// Client-supplied idempotency key. Only meaningful when the append
    /// batch contains exactly one event (spec.md §3, enforced by C3).
    pub idempotency_key: Option<String>,
}

impl<D> EphemeralEvent<D> {
    pub fn new(event_type: impl Into<String>, data: D, tags: TagSet) -> Self {
        Self { event_type: event_type.into(), data, tags, idempotency_key: None }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// A committed event (spec.md §3 "Event").
///
/// `event_type` is the current domain type name after upcasting;
/// `stored_type` is the name as written — equal unless the event was
/// upcasted at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<D> {
    pub stream: EventStreamId,
    pub event_type: String,
    pub stored_type: String,
    pub reference: EventReference,
    pub data: D,
    pub tags: TagSet,
    pub timestamp: DateTime<Utc>,
}

impl<D> Event<D> {
    /// Construct an event with `stored_type == event_type`, i.e. as written
    /// with no upcasting applied.
    pub fn as_written(
        stream: EventStreamId,
        event_type: impl Into<String>,
        reference: EventReference,
        data: D,
        tags: TagSet,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let event_type = event_type.into();
        Self {
            stream,
            stored_type: event_type.clone(),
            event_type,
            reference,
            data,
            tags,
            timestamp,
        }
    }
}

impl<D> Matchable for Event<D> {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn event_tags(&self) -> &TagSet {
        &self.tags
    }

    fn event_reference(&self) -> &EventReference {
        &self.reference
    }
}

/// Optimistic-lock predicate for an append (spec.md §3 "Append criteria").
///
/// `query = MatchNone` means unconditional append. Otherwise the append
/// succeeds iff no event matching `query` exists with `happenedAfter`
/// `expected_last` — `expected_last` absent means "the stream is expected to
/// contain zero matches for `query`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendCriteria {
    pub query: EventQuery,
    pub expected_last: Option<EventReference>,
}

impl AppendCriteria {
    /// Unconditional append.
    pub fn unconditional() -> Self {
        Self { query: EventQuery::match_none(), expected_last: None }
    }

    pub fn new(query: EventQuery, expected_last: Option<EventReference>) -> Self {
        Self { query, expected_last }
    }

    pub fn is_unconditional(&self) -> bool {
        self.query.is_match_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EventId;

    #[test]
    fn as_written_has_matching_types() {
        let e = Event::as_written(
            EventStreamId::concrete("app", "domain"),
            "AccountOpened",
            EventReference::new(EventId::new(), 1, 1),
            serde_json::json!({"account": "1"}),
            TagSet::parse_all(["account:1"]),
            Utc::now(),
        );
        assert_eq!(e.event_type, e.stored_type);
    }

    #[test]
    fn unconditional_criteria_is_match_none() {
        let c = AppendCriteria::unconditional();
        assert!(c.is_unconditional());
        assert!(c.expected_last.is_none());
    }
}
