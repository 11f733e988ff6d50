//! Append engine (spec.md §4.3): shared pieces of the algorithm every
//! backend's `Storage::append` must implement. Position/tx assignment and
//! batch validation are pure and backend-independent; the idempotency guard
//! and optimistic-lock check need the backend's own critical section (they
//! must run as one atomic unit with the write), so backends call these
//! helpers from inside that section rather than delegating the whole
//! algorithm here.

use chrono::{DateTime, Utc};
use dcb_core::{AppendCriteria, Event, EventId, EventReference, EventStreamId};

use crate::error::{self, AppendError};
use crate::storage::{PreparedEvent, StoredEvent};

/// Step 3's batch-shape checks (spec.md §4.3, §7 `InvalidBatch`): at most one
/// idempotency key per batch, and a batch must not be empty when its
/// criteria are also a no-op (nothing would be written and nothing checked).
/// Returns the batch's single idempotency key, if any.
pub fn validate_batch_shape<'a>(
    criteria: &AppendCriteria,
    events: &'a [PreparedEvent],
) -> Result<Option<&'a str>, AppendError> {
    if events.is_empty() && criteria.is_unconditional() {
        return error::append_error::InvalidBatchSnafu { reason: "empty append batch with no-op criteria".to_string() }
            .fail();
    }
    let keys: Vec<&str> =
        events.iter().filter_map(|e| e.idempotency_key.as_deref()).collect();
    if keys.len() > 1 {
        return error::append_error::InvalidBatchSnafu {
            reason: "more than one idempotency key in a single append batch".to_string(),
        }
        .fail();
    }
    if !keys.is_empty() && events.len() != 1 {
        return error::append_error::InvalidBatchSnafu {
            reason: "an idempotency key is only permitted when the batch contains exactly one event"
                .to_string(),
        }
        .fail();
    }
    Ok(keys.first().copied())
}

/// Step 4's optimistic lock check (spec.md §4.3): given the events currently
/// on record that match `criteria.query` (an unconditional `matchNone`
/// criteria always passes), fail if any of them violates the lock.
pub fn check_optimistic_lock(
    criteria: &AppendCriteria,
    matching_existing: &[StoredEvent],
) -> Result<(), AppendError> {
    if criteria.is_unconditional() {
        return Ok(());
    }
    let violated = match &criteria.expected_last {
        None => !matching_existing.is_empty(),
        Some(expected) => matching_existing.iter().any(|e| e.reference.happened_after(expected)),
    };
    if violated {
        return error::append_error::OptimisticLockViolatedSnafu {
            query: criteria.query.clone(),
            expected_last: criteria.expected_last.clone(),
        }
        .fail();
    }
    Ok(())
}

/// Step 5: assign one contiguous `position` per event (input order
/// preserved) and a single shared `tx`, stamping `timestamp` at commit
/// (spec.md §3 invariants 1–2).
pub fn assign_positions(
    events: Vec<PreparedEvent>,
    stream: &EventStreamId,
    starting_position: u64,
    tx: u64,
    timestamp: DateTime<Utc>,
) -> Vec<StoredEvent> {
    events
        .into_iter()
        .enumerate()
        .map(|(offset, event)| {
            let reference = EventReference::new(EventId::new(), starting_position + offset as u64, tx);
            Event::as_written(stream.clone(), event.event_type, reference, event.data, event.tags, timestamp)
        })
        .collect()
}
