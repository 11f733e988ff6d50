//! End-to-end coverage of the notification fabric (spec.md §4.7) wired
//! through the in-memory `Storage` backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dcb_core::{AppendCriteria, EphemeralEvent, EventReference, EventStreamId, TagSet};
use dcb_store::notify::{AppendBatch, AppendNotification, ConsistentListener, EventualListener};
use dcb_store::Storage;
use dcb_store_memory::InMemoryStorage;

struct RecordingConsistent {
    calls: AtomicUsize,
}

impl ConsistentListener for RecordingConsistent {
    fn appended(&self, batch: AppendBatch<'_>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.calls.fetch_add(batch.events.len(), Ordering::SeqCst);
        Ok(())
    }
}

struct RecordingEventual {
    calls: AtomicUsize,
}

impl EventualListener for RecordingEventual {
    fn appended(
        &self,
        notification: &AppendNotification,
    ) -> Result<EventReference, Box<dyn std::error::Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(notification.last_ref.clone())
    }
}

fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("condition never became true");
}

#[test]
fn consistent_listener_sees_only_its_own_facade_writes() {
    let storage = InMemoryStorage::new();
    let stream_a = EventStreamId::concrete("app", "a");
    let stream_b = EventStreamId::concrete("app", "b");

    let listener = Arc::new(RecordingConsistent { calls: AtomicUsize::new(0) });
    storage.subscribe_consistent(stream_a.clone(), listener.clone());

    storage
        .append(&AppendCriteria::unconditional(), &stream_a, vec![ephemeral("E")])
        .unwrap();
    storage
        .append(&AppendCriteria::unconditional(), &stream_b, vec![ephemeral("E")])
        .unwrap();

    assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
    storage.stop();
}

#[test]
fn eventually_consistent_listener_observes_wildcard_reads() {
    let storage = InMemoryStorage::new();
    let listener = Arc::new(RecordingEventual { calls: AtomicUsize::new(0) });
    storage.subscribe_eventual(EventStreamId::wildcard(), listener.clone());

    storage
        .append(
            &AppendCriteria::unconditional(),
            &EventStreamId::concrete("app", "domain"),
            vec![ephemeral("E"), ephemeral("E")],
        )
        .unwrap();

    wait_until(|| listener.calls.load(Ordering::SeqCst) >= 1);
    storage.stop();
}

fn ephemeral(event_type: &str) -> dcb_store::storage::PreparedEvent {
    EphemeralEvent::new(event_type, serde_json::json!({}), TagSet::new())
}
