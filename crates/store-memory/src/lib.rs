//! In-memory `Storage` backend (spec.md §6): a single ordered sequence, a
//! hashmap of id→index for `getEventById`, a hashmap for bookmarks, and a
//! notification dispatcher, all guarded by one mutex around append/query so
//! that optimistic-lock checks and writes form one critical section.
//!
//! Intended for tests and development, mirroring the role
//! `InMemoryEventStore` plays in the teacher's infra crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dcb_core::{
    AppendCriteria, Bookmark, EventId, EventQuery, EventReference, EventStreamId, TagSet,
};
use dcb_store::direction::Direction;
use dcb_store::error::{self, AppendError, QueryError};
use dcb_store::notify::{BookmarkListener, BookmarkNotification, ConsistentListener, Dispatcher, EventualListener};
use dcb_store::storage::{EventIterator, PreparedEvent, Storage, StoredEvent};
use dcb_store::{append_engine, query_engine};
use snafu::ResultExt;

const LOG_TARGET: &str = "dcb::store::memory";

#[derive(Default)]
struct Log {
    events: Vec<StoredEvent>,
    by_id: HashMap<EventId, usize>,
    idempotency: HashMap<(EventStreamId, String), usize>,
    bookmarks: HashMap<String, Bookmark>,
    next_position: u64,
    next_tx: u64,
}

/// In-memory append-only event store implementing the DCB `Storage` port.
pub struct InMemoryStorage {
    log: Mutex<Log>,
    dispatcher: Dispatcher,
    absolute_limit: Option<usize>,
    stopped: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Log::default()),
            dispatcher: Dispatcher::new(),
            absolute_limit: None,
            stopped: AtomicBool::new(false),
        }
    }

    /// Configure the storage-wide absolute result limit (spec.md §4.2).
    pub fn with_absolute_limit(mut self, limit: usize) -> Self {
        self.absolute_limit = Some(limit);
        self
    }

    fn check_open(&self) -> Result<(), AppendError> {
        if self.stopped.load(Ordering::SeqCst) {
            return error::append_error::StorageClosedSnafu.fail();
        }
        Ok(())
    }

    fn check_open_query(&self) -> Result<(), QueryError> {
        if self.stopped.load(Ordering::SeqCst) {
            return error::query_error::StorageClosedSnafu.fail();
        }
        Ok(())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for InMemoryStorage {
    fn query(
        &self,
        query: &EventQuery,
        stream_id: Option<&EventStreamId>,
        after: Option<&EventReference>,
        limit: Option<usize>,
        direction: Direction,
    ) -> Result<EventIterator, QueryError> {
        self.check_open_query()?;
        let log = self.log.lock().unwrap();

        let mut scoped: Vec<StoredEvent> = log
            .events
            .iter()
            .filter(|e| stream_id.map_or(true, |s| s.can_read(&e.stream)))
            .cloned()
            .collect();

        match direction {
            Direction::Forward => scoped.sort_by_key(|e| e.reference),
            Direction::Backward => scoped.sort_by_key(|e| std::cmp::Reverse(e.reference)),
        }

        let matched = query_engine::run(scoped, query, after, direction, limit, self.absolute_limit)?;
        Ok(Box::new(matched.into_iter().map(Ok)))
    }

    fn append(
        &self,
        criteria: &AppendCriteria,
        stream_id: &EventStreamId,
        events: Vec<PreparedEvent>,
    ) -> Result<Vec<StoredEvent>, AppendError> {
        self.check_open()?;
        // Wildcard-stream rejection (`NonSpecificStream`) is `dcb-streams`'
        // facade-layer responsibility (spec.md §4.5); the storage port
        // itself accepts whatever concrete or wildcard id the caller passes.

        let idempotency_key = append_engine::validate_batch_shape(criteria, &events)?.map(str::to_string);

        let mut log = self.log.lock().unwrap();

        if let Some(key) = idempotency_key.as_deref() {
            if let Some(&idx) = log.idempotency.get(&(stream_id.clone(), key.to_string())) {
                tracing::debug!(target: LOG_TARGET, %key, "idempotent append short-circuited");
                return Ok(vec![log.events[idx].clone()]);
            }
        }

        if !criteria.is_unconditional() {
            let matching: Vec<StoredEvent> = log
                .events
                .iter()
                .filter(|e| criteria.query.matches(*e))
                .cloned()
                .collect();
            append_engine::check_optimistic_lock(criteria, &matching)?;
        }

        let position = log.next_position + 1;
        let tx = log.next_tx + 1;
        let timestamp = chrono::Utc::now();
        let stored = append_engine::assign_positions(events, stream_id, position, tx, timestamp);

        log.next_position += stored.len() as u64;
        log.next_tx = tx;

        for (offset, event) in stored.iter().enumerate() {
            let idx = log.events.len() + offset;
            log.by_id.insert(event.reference.id.clone(), idx);
        }
        if let Some(key) = idempotency_key {
            log.idempotency.insert((stream_id.clone(), key), log.events.len());
        }
        log.events.extend(stored.iter().cloned());

        drop(log);

        self.dispatcher.notify_consistent(stream_id, &stored).context(error::append_error::StorageErrorSnafu)?;
        if let Some(last) = stored.last() {
            self.dispatcher.notify_append(dcb_store::notify::AppendNotification {
                stream: stream_id.clone(),
                last_ref: last.reference.clone(),
            });
        }

        Ok(stored)
    }

    fn get_event_by_id(&self, id: &EventId) -> Result<Option<StoredEvent>, QueryError> {
        self.check_open_query()?;
        let log = self.log.lock().unwrap();
        Ok(log.by_id.get(id).map(|&idx| log.events[idx].clone()))
    }

    fn put_bookmark(&self, reader: &str, reference: &EventReference, tags: &TagSet) -> Result<(), QueryError> {
        self.check_open_query()?;
        let mut log = self.log.lock().unwrap();
        log.bookmarks.insert(reader.to_string(), Bookmark::new(reader, reference.clone(), tags.clone()));
        drop(log);
        self.dispatcher.notify_bookmark(BookmarkNotification { reader: reader.to_string(), reference: reference.clone() });
        Ok(())
    }

    fn get_bookmark(&self, reader: &str) -> Result<Option<Bookmark>, QueryError> {
        self.check_open_query()?;
        Ok(self.log.lock().unwrap().bookmarks.get(reader).cloned())
    }

    fn remove_bookmark(&self, reader: &str) -> Result<Option<EventReference>, QueryError> {
        self.check_open_query()?;
        Ok(self.log.lock().unwrap().bookmarks.remove(reader).map(|b| b.reference))
    }

    fn subscribe_consistent(&self, stream_id: EventStreamId, listener: Arc<dyn ConsistentListener>) -> u64 {
        self.dispatcher.subscribe_consistent(stream_id, listener)
    }

    fn subscribe_eventual(&self, stream_id: EventStreamId, listener: Arc<dyn EventualListener>) -> u64 {
        self.dispatcher.subscribe_eventual(stream_id, listener)
    }

    fn subscribe_bookmark(&self, listener: Arc<dyn BookmarkListener>) -> u64 {
        self.dispatcher.subscribe_bookmark(listener)
    }

    fn unsubscribe(&self, subscription_id: u64) {
        self.dispatcher.unsubscribe(subscription_id);
    }

    fn absolute_limit(&self) -> Option<usize> {
        self.absolute_limit
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.dispatcher.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcb_core::{EphemeralEvent, QueryItem, TypeFilter};
    use proptest::prelude::*;

    fn storage() -> InMemoryStorage {
        InMemoryStorage::new()
    }

    fn ephemeral(event_type: &str, tags: &[&str]) -> PreparedEvent {
        EphemeralEvent::new(event_type, serde_json::json!({}), TagSet::parse_all(tags.iter().copied()))
    }

    #[test]
    fn unconditional_append_and_read_back() {
        let storage = storage();
        let stream = EventStreamId::concrete("app", "domain");
        let stored = storage
            .append(&AppendCriteria::unconditional(), &stream, vec![ephemeral("AccountOpened", &["account:1"])])
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].reference.position, 1);

        let matched: Vec<_> = storage
            .query(&EventQuery::match_all(), None, None, None, Direction::Forward)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].event_type, "AccountOpened");
    }

    #[test]
    fn optimistic_lock_hit_matches_scenario_2() {
        let storage = storage();
        let stream = EventStreamId::concrete("app", "domain");
        let account_tag = |n: &str| TagSet::parse_all([format!("account:{n}").as_str()]);

        let e1 = EphemeralEvent::new("AccountOpened", serde_json::json!({"a": "1"}), account_tag("1"));
        let e2 = EphemeralEvent::new("AccountOpened", serde_json::json!({"a": "2"}), account_tag("2"));
        let e3 = EphemeralEvent::new("AccountOpened", serde_json::json!({"a": "3"}), account_tag("3"));
        let e4 = EphemeralEvent::new("MoneyDeposited", serde_json::json!({"amt": 800}), account_tag("1"));
        let e5 = EphemeralEvent::new("MoneyDeposited", serde_json::json!({"amt": 200}), account_tag("2"));
        let stored = storage.append(&AppendCriteria::unconditional(), &stream, vec![e1, e2, e3, e4, e5]).unwrap();
        let last_ref_for_account_1 = stored[3].reference.clone();

        let query = EventQuery::items([QueryItem::new().with_tags(TagSet::parse_all(["account:1"]))]);
        let matches: Vec<_> = storage
            .query(&query, None, None, None, Direction::Forward)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(matches.iter().map(|e| e.reference.position).collect::<Vec<_>>(), vec![1, 4]);

        let withdrawn = EphemeralEvent::new("MoneyWithdrawn", serde_json::json!({"amt": 100}), TagSet::parse_all(["account:1"]));
        storage.append(&AppendCriteria::unconditional(), &stream, vec![withdrawn]).unwrap();

        let transfer = EphemeralEvent::new("MoneyTransfered", serde_json::json!({}), TagSet::parse_all(["account:1"]));
        let criteria = AppendCriteria::new(query, Some(last_ref_for_account_1));
        let err = storage.append(&criteria, &stream, vec![transfer]).unwrap_err();
        assert!(matches!(err, AppendError::OptimisticLockViolated { .. }));
    }

    #[test]
    fn empty_stream_expectation_race_matches_scenario_3() {
        let storage = storage();
        let stream = EventStreamId::concrete("app", "domain");
        let first = ephemeral("FirstDomainEvent", &["account:1"]);
        storage.append(&AppendCriteria::unconditional(), &stream, vec![first.clone()]).unwrap();

        let criteria = AppendCriteria::new(EventQuery::match_all(), None);
        let err = storage.append(&criteria, &stream, vec![first.clone()]).unwrap_err();
        assert!(matches!(err, AppendError::OptimisticLockViolated { .. }));

        let stored = storage.append(&AppendCriteria::unconditional(), &stream, vec![first]).unwrap();
        assert_eq!(stored[0].reference.position, 2);
    }

    #[test]
    fn idempotent_append_is_a_no_op_on_replay() {
        let storage = storage();
        let stream = EventStreamId::concrete("app", "domain");
        let event = EphemeralEvent::new("Deposited", serde_json::json!({}), TagSet::new())
            .with_idempotency_key("req-1");

        let first = storage.append(&AppendCriteria::unconditional(), &stream, vec![event.clone()]).unwrap();
        let second = storage.append(&AppendCriteria::unconditional(), &stream, vec![event]).unwrap();
        assert_eq!(first[0].reference, second[0].reference);

        let all: Vec<_> = storage
            .query(&EventQuery::match_all(), None, None, None, Direction::Forward)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn get_event_by_id_finds_committed_events() {
        let storage = storage();
        let stream = EventStreamId::concrete("app", "domain");
        let stored = storage.append(&AppendCriteria::unconditional(), &stream, vec![ephemeral("E", &[])]).unwrap();
        let found = storage.get_event_by_id(&stored[0].reference.id).unwrap().unwrap();
        assert_eq!(found.reference, stored[0].reference);
        assert!(storage.get_event_by_id(&EventId::new()).unwrap().is_none());
    }

    #[test]
    fn bookmark_put_is_idempotent_upsert() {
        let storage = storage();
        let reference = EventReference::new(EventId::new(), 1, 1);
        storage.put_bookmark("reader", &reference, &TagSet::new()).unwrap();
        storage.put_bookmark("reader", &reference, &TagSet::new()).unwrap();
        assert_eq!(storage.get_bookmark("reader").unwrap().unwrap().reference, reference);
        assert_eq!(storage.remove_bookmark("reader").unwrap(), Some(reference));
        assert!(storage.get_bookmark("reader").unwrap().is_none());
    }

    #[test]
    fn query_respects_stream_wildcard_scoping() {
        let storage = storage();
        storage
            .append(&AppendCriteria::unconditional(), &EventStreamId::concrete("app", "a"), vec![ephemeral("E", &[])])
            .unwrap();
        storage
            .append(&AppendCriteria::unconditional(), &EventStreamId::concrete("app", "b"), vec![ephemeral("E", &[])])
            .unwrap();

        let scope = EventStreamId::any_purpose("app").with_purpose("a");
        let matched: Vec<_> = storage
            .query(&EventQuery::match_all(), Some(&scope), None, None, Direction::Forward)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].stream.purpose(), Some("a"));
    }

    #[test]
    fn type_admission_enforced_only_above_storage_layer() {
        // The storage port itself does not know about facades/admission —
        // that is dcb-streams' job (spec.md §4.5). This test documents the
        // boundary: storage accepts any type name.
        let storage = storage();
        let stream = EventStreamId::concrete("app", "domain");
        assert!(storage.append(&AppendCriteria::unconditional(), &stream, vec![ephemeral("Anything", &[])]).is_ok());
    }

    #[test]
    fn stop_rejects_further_operations() {
        let storage = storage();
        storage.stop();
        let err = storage
            .append(&AppendCriteria::unconditional(), &EventStreamId::concrete("app", "domain"), vec![ephemeral("E", &[])])
            .unwrap_err();
        assert!(matches!(err, AppendError::StorageClosed { .. }));
    }

    proptest! {
        #[test]
        fn unconditional_appends_yield_strictly_increasing_contiguous_positions_and_remain_retrievable(
            batch_sizes in prop::collection::vec(1usize..5, 1..8),
        ) {
            let storage = storage();
            let stream = EventStreamId::concrete("app", "domain");
            let mut next_expected = 1u64;
            for size in batch_sizes {
                let events: Vec<_> = (0..size).map(|_| ephemeral("E", &[])).collect();
                let stored = storage.append(&AppendCriteria::unconditional(), &stream, events).unwrap();
                for event in &stored {
                    prop_assert_eq!(event.reference.position, next_expected);
                    next_expected += 1;
                    prop_assert_eq!(
                        storage.get_event_by_id(&event.reference.id).unwrap().map(|e| e.reference),
                        Some(event.reference.clone())
                    );
                }
            }
        }
    }
}
