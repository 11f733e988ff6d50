//! Top-level facade wiring the storage port, stream admission, codec, and
//! upcasting into one typed entry point (spec.md overview, C2–C8).
//!
//! `dcb-store`'s `Storage` trait is payload-agnostic (it only ever sees
//! `serde_json::Value`); this crate is where a domain type `T` meets that
//! port — encoding on write, decoding (after upcasting, if the stored
//! record is a legacy type) on read.

pub mod error;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dcb_codec::{Codec, JsonCodec};
use dcb_core::{AppendCriteria, EphemeralEvent, EventId, EventQuery, EventReference, EventStreamId, QueryItem, TagSet, TypeFilter};
use dcb_store::direction::Direction;
use dcb_store::notify::{BookmarkListener, ConsistentListener, EventualListener};
use dcb_store::storage::{Storage, StoredEvent};
use dcb_streams::StreamFacade;
use dcb_upcast::UpcasterRegistry;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use dcb_projections::{BookmarkOptions, BookmarkReadFrequency, Metrics, Projection, ProjectionConfig, ProjectionHandler, Projector, ProjectorError};
pub use dcb_streams::{FacadeError, RootSpec, StreamWriteError};
pub use error::DcbError;

const LOG_TARGET: &str = "dcb";

/// A committed event decoded back into its domain type, with any legacy
/// `storedType` already upcasted (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct TypedEvent<T> {
    pub stream: EventStreamId,
    pub event_type: String,
    pub stored_type: String,
    pub reference: EventReference,
    pub data: T,
    pub tags: TagSet,
    pub timestamp: DateTime<Utc>,
}

/// One event to submit for append: a type name, a typed payload, and tags.
pub struct NewEvent<T> {
    pub event_type: String,
    pub data: T,
    pub tags: TagSet,
    pub idempotency_key: Option<String>,
}

impl<T> NewEvent<T> {
    pub fn new(event_type: impl Into<String>, data: T, tags: TagSet) -> Self {
        Self { event_type: event_type.into(), data, tags, idempotency_key: None }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Wires a `Storage` backend, a `Codec`, and an `UpcasterRegistry` into the
/// typed append/query surface a client actually calls (spec.md overview:
/// "DCB... defined per decision by a query over facts").
///
/// `Storage` is the only thing backends differ on; everything above it in
/// this crate is backend-agnostic, so `EventStore` takes an `Arc<dyn
/// Storage>` rather than being generic over a concrete backend type.
pub struct EventStore<C: Codec = JsonCodec> {
    storage: Arc<dyn Storage>,
    codec: C,
    upcasters: UpcasterRegistry,
}

impl EventStore<JsonCodec> {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage, codec: JsonCodec, upcasters: UpcasterRegistry::empty() }
    }
}

impl<C: Codec> EventStore<C> {
    pub fn with_codec(storage: Arc<dyn Storage>, codec: C) -> Self {
        Self { storage, codec, upcasters: UpcasterRegistry::empty() }
    }

    pub fn with_upcasters(mut self, upcasters: UpcasterRegistry) -> Self {
        self.upcasters = upcasters;
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Encodes and appends `events` under `criteria`, after checking each
    /// event's admission against `facade` (spec.md §4.3, §4.5). Before a
    /// payload is written, it must round-trip through the codec back into
    /// its declared type (spec.md §4.3 step 2) — a value that encodes but
    /// does not decode back equal to itself is rejected rather than written.
    pub fn append<T: Serialize + DeserializeOwned + PartialEq>(
        &self,
        facade: &StreamFacade,
        criteria: AppendCriteria,
        events: Vec<NewEvent<T>>,
    ) -> Result<Vec<TypedEvent<T>>, DcbError> {
        let mut prepared = Vec::with_capacity(events.len());
        for event in events {
            facade.check_admission_for_write(&event.event_type)?;
            if !self.codec.round_trips(&event.data)? {
                return Err(dcb_store::error::append_error::SerializationErrorSnafu {
                    reason: format!("payload for event type {} does not round-trip through the codec", event.event_type),
                }
                .build()
                .into());
            }
            let wire = self.codec.encode(&event.data)?;
            let mut ephemeral = EphemeralEvent::new(event.event_type, wire, event.tags);
            if let Some(key) = event.idempotency_key {
                ephemeral = ephemeral.with_idempotency_key(key);
            }
            prepared.push(ephemeral);
        }

        let stored = self.storage.append(&criteria, facade.stream_id(), prepared)?;
        // Events just written always have event_type == stored_type: no
        // upcasting applies to a record this call produced itself.
        stored.into_iter().map(|event| self.decode(event)).collect()
    }

    /// Reads matches for `query` through `facade`: rewrites the query so
    /// type filters also admit legacy types whose upcaster targets the
    /// named current type (spec.md §4.6 "transparent" read-time upcasting),
    /// then decodes and upcasts every result.
    pub fn query<T: DeserializeOwned>(
        &self,
        facade: &StreamFacade,
        query: &EventQuery,
        after: Option<&EventReference>,
        limit: Option<usize>,
        direction: Direction,
    ) -> Result<Vec<TypedEvent<T>>, DcbError> {
        let expanded = self.expand_for_upcasting(query);
        let effective_limit = self.storage.effective_limit(limit)?;
        let iterator = self.storage.query(&expanded, Some(facade.stream_id()), after, effective_limit, direction)?;

        let mut results = Vec::with_capacity(effective_limit.unwrap_or(0));
        for event in iterator {
            results.push(self.decode_with_upcasting(event?)?);
        }
        Ok(results)
    }

    pub fn get_event_by_id<T: DeserializeOwned>(&self, id: &EventId) -> Result<Option<TypedEvent<T>>, DcbError> {
        match self.storage.get_event_by_id(id)? {
            Some(event) => Ok(Some(self.decode_with_upcasting(event)?)),
            None => Ok(None),
        }
    }

    pub fn put_bookmark(&self, reader: &str, reference: &EventReference, tags: &TagSet) -> Result<(), DcbError> {
        Ok(self.storage.put_bookmark(reader, reference, tags)?)
    }

    pub fn get_bookmark(&self, reader: &str) -> Result<Option<dcb_core::Bookmark>, DcbError> {
        Ok(self.storage.get_bookmark(reader)?)
    }

    pub fn remove_bookmark(&self, reader: &str) -> Result<Option<EventReference>, DcbError> {
        Ok(self.storage.remove_bookmark(reader)?)
    }

    pub fn subscribe_consistent(&self, stream_id: EventStreamId, listener: Arc<dyn ConsistentListener>) -> u64 {
        self.storage.subscribe_consistent(stream_id, listener)
    }

    pub fn subscribe_eventual(&self, stream_id: EventStreamId, listener: Arc<dyn EventualListener>) -> u64 {
        self.storage.subscribe_eventual(stream_id, listener)
    }

    pub fn subscribe_bookmark(&self, listener: Arc<dyn BookmarkListener>) -> u64 {
        self.storage.subscribe_bookmark(listener)
    }

    pub fn unsubscribe(&self, subscription_id: u64) {
        self.storage.unsubscribe(subscription_id);
    }

    pub fn stop(&self) {
        self.storage.stop();
    }

    /// Decode a record's `data` as-is, with no upcasting — used for events
    /// this call just wrote (always already current).
    fn decode<T: DeserializeOwned>(&self, event: StoredEvent) -> Result<TypedEvent<T>, DcbError> {
        let data = self.codec.decode(&event.data)?;
        Ok(TypedEvent {
            stream: event.stream,
            event_type: event.event_type,
            stored_type: event.stored_type,
            reference: event.reference,
            data,
            tags: event.tags,
            timestamp: event.timestamp,
        })
    }

    /// Decode a record read back from storage, applying an upcaster first
    /// if `stored_type` is a known legacy type (spec.md §4.6).
    fn decode_with_upcasting<T: DeserializeOwned>(&self, mut event: StoredEvent) -> Result<TypedEvent<T>, DcbError> {
        if let Some((target_type, upcasted)) = self.upcasters.apply(&event.stored_type, &event.data)? {
            tracing::debug!(target: LOG_TARGET, stored_type = %event.stored_type, %target_type, "upcasted legacy event at read time");
            event.event_type = target_type;
            event.data = upcasted;
        }
        self.decode(event)
    }

    /// Rewrites every `Named` type filter in `query` so it also admits the
    /// legacy source types whose upcaster targets one of the named current
    /// types — storage itself only ever sees `stored_type`, so a query for
    /// a current type name would otherwise silently miss events written
    /// under a since-upcasted legacy name (spec.md §4.6).
    fn expand_for_upcasting(&self, query: &EventQuery) -> EventQuery {
        let (items, until) = match query {
            EventQuery::Items { items, until } => (items.clone(), until.clone()),
            other => return other.clone(),
        };
        let items = items
            .into_iter()
            .map(|item| match item.types {
                Some(TypeFilter::Named(names)) => {
                    let mut expanded = names.clone();
                    for name in &names {
                        expanded.extend(self.upcasters.legacy_types_targeting(name).into_iter().map(str::to_string));
                    }
                    QueryItem { types: Some(TypeFilter::Named(expanded)), tags: item.tags }
                }
                other => QueryItem { types: other, tags: item.tags },
            })
            .collect();
        EventQuery::Items { items, until }
    }
}
