//! The `Storage` port (spec.md §4.2): the boundary between the core and any
//! concrete backend. Implementations must be thread-safe for concurrent
//! `append`, `query`, `get_event_by_id`, and bookmark operations.

use dcb_core::{AppendCriteria, Bookmark, EphemeralEvent, Event, EventId, EventQuery, EventReference, EventStreamId, TagSet};

use std::sync::Arc;

use crate::direction::Direction;
use crate::error::{AppendError, QueryError};
use crate::notify::{BookmarkListener, ConsistentListener, EventualListener};

/// The wire-level payload representation events carry through the storage
/// port. Backends persist and return this shape verbatim; domain-level
/// encode/decode and upcasting happen above this layer.
pub type Wire = serde_json::Value;

/// An event as returned by a backend: `storedType` is whatever the backend
/// actually has on record, with `type` left equal to it (no upcasting
/// knowledge lives at this layer — see `dcb-upcast`).
pub type StoredEvent = Event<Wire>;

/// An event as submitted for append, prior to position/tx/timestamp
/// assignment.
pub type PreparedEvent = EphemeralEvent<Wire>;

/// A streaming, single-pass, pull-based result set (spec.md §4.4: "the
/// engine is pull-based and streaming; it must not materialize the entire
/// match set if `limit` is finite").
pub type EventIterator = Box<dyn Iterator<Item = Result<StoredEvent, QueryError>> + Send>;

/// The abstract append-only log (spec.md §4.2).
pub trait Storage: Send + Sync {
    /// Returns matches starting strictly after `after` (or from the end when
    /// `direction = Backward` and `after` is `None`), stopping at
    /// `query.until` (inclusive by position), truncated to `limit`.
    fn query(
        &self,
        query: &EventQuery,
        stream_id: Option<&EventStreamId>,
        after: Option<&EventReference>,
        limit: Option<usize>,
        direction: Direction,
    ) -> Result<EventIterator, QueryError>;

    /// Atomic: validates `criteria` against an equivalent internal query
    /// under a mutual-exclusion discipline sufficient to prevent any event
    /// matching the criteria from being inserted between validation and
    /// write, assigns `position`/`tx`/`timestamp`, and returns the stored
    /// events.
    fn append(
        &self,
        criteria: &AppendCriteria,
        stream_id: &EventStreamId,
        events: Vec<PreparedEvent>,
    ) -> Result<Vec<StoredEvent>, AppendError>;

    fn get_event_by_id(&self, id: &EventId) -> Result<Option<StoredEvent>, QueryError>;

    /// Upsert semantics.
    fn put_bookmark(&self, reader: &str, reference: &EventReference, tags: &TagSet) -> Result<(), QueryError>;

    fn get_bookmark(&self, reader: &str) -> Result<Option<Bookmark>, QueryError>;

    /// Upsert semantics; returns the reference the bookmark held before
    /// removal, if any.
    fn remove_bookmark(&self, reader: &str) -> Result<Option<EventReference>, QueryError>;

    /// Register a consistent (synchronous, same-facade-only) append listener
    /// for writes to `stream_id` (spec.md §4.7).
    fn subscribe_consistent(&self, stream_id: EventStreamId, listener: Arc<dyn ConsistentListener>) -> u64;

    /// Register an eventually-consistent append listener for any write whose
    /// stream `stream_id.can_read` (spec.md §4.7).
    fn subscribe_eventual(&self, stream_id: EventStreamId, listener: Arc<dyn EventualListener>) -> u64;

    /// Register a bookmark-update listener (always eventually consistent).
    fn subscribe_bookmark(&self, listener: Arc<dyn BookmarkListener>) -> u64;

    /// Drop a previously registered listener of any kind.
    fn unsubscribe(&self, subscription_id: u64);

    /// Reconciles a user-requested soft limit with the storage-wide absolute
    /// limit (spec.md §4.2).
    fn effective_limit(&self, soft: Option<usize>) -> Result<Option<usize>, QueryError> {
        crate::query_engine::effective_limit(soft, self.absolute_limit())
    }

    /// The storage-wide absolute result limit, if any is configured.
    fn absolute_limit(&self) -> Option<usize>;

    /// Drains the notification queue best-effort, signals dispatcher threads
    /// to exit, and refuses further appends. In-flight appends complete or
    /// fail with `StorageClosed` (spec.md §5).
    fn stop(&self);
}
