//! Projection runtime (spec.md §4.8): replays a query against a `Storage`
//! backend in bookmarked batches, handing matched events to a
//! `ProjectionHandler` with `beforeBatch`/`afterBatch`/`cancelBatch` hooks
//! bracketing each batch.
//!
//! Mirrors the role the teacher's `crates/infra/src/projections` module
//! plays for ERP read models, but built directly on the `Storage` port
//! rather than a concrete aggregate store, and driven by a tag/type query
//! instead of an aggregate id.

use dcb_core::{EventQuery, EventReference, EventStreamId, TagSet};
use dcb_store::direction::Direction;
use dcb_store::storage::{Storage, StoredEvent};
use snafu::{Location, Snafu};
use std::sync::Arc;

const LOG_TARGET: &str = "dcb::projections";

/// When a projection re-reads its bookmark relative to a `run()` call
/// (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BookmarkReadFrequency {
    /// Never read automatically; the caller supplies `starting_after`.
    Manual,
    /// Read once, when the `Projector` is constructed.
    AtCreation,
    /// Read once, on the first `run()`/`run_until()` call only.
    BeforeFirst,
    /// Read before every batch (the default).
    #[default]
    BeforeEach,
}

/// Bookmark persistence options for a projection (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct BookmarkOptions {
    reader: String,
    tags: TagSet,
    read_frequency: BookmarkReadFrequency,
}

impl BookmarkOptions {
    pub fn new(reader: impl Into<String>) -> Self {
        Self { reader: reader.into(), tags: TagSet::new(), read_frequency: BookmarkReadFrequency::default() }
    }

    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_read_frequency(mut self, frequency: BookmarkReadFrequency) -> Self {
        self.read_frequency = frequency;
        self
    }

    pub fn reader(&self) -> &str {
        &self.reader
    }
}

/// What a projection replays: a query, optionally narrowed to one stream
/// (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct Projection {
    pub query: EventQuery,
    pub stream_id: Option<EventStreamId>,
}

impl Projection {
    pub fn new(query: EventQuery) -> Self {
        Self { query, stream_id: None }
    }

    pub fn scoped_to(mut self, stream_id: EventStreamId) -> Self {
        self.stream_id = Some(stream_id);
        self
    }
}

/// Tunables for a `Projector` run (spec.md §4.8: `startingAfter`,
/// `inBatchesOf` default 500, `bookmark`).
#[derive(Debug, Clone)]
pub struct ProjectionConfig {
    starting_after: Option<EventReference>,
    batch_size: usize,
    bookmark: Option<BookmarkOptions>,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self { starting_after: None, batch_size: 500, bookmark: None }
    }
}

impl ProjectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_after(mut self, reference: EventReference) -> Self {
        self.starting_after = Some(reference);
        self
    }

    pub fn in_batches_of(mut self, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        self.batch_size = batch_size;
        self
    }

    pub fn with_bookmark(mut self, bookmark: BookmarkOptions) -> Self {
        self.bookmark = Some(bookmark);
        self
    }
}

/// Per-run and cumulative replay counters (spec.md §4.8).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    pub events_streamed: u64,
    pub events_handled: u64,
    pub queries_done: u64,
    pub last_ref: Option<EventReference>,
}

impl Metrics {
    /// Folds `other` (a single batch's counters) into `self` (the run-wide
    /// total), keeping whichever `last_ref` is most recent.
    pub fn accumulate(&mut self, other: Metrics) {
        self.events_streamed += other.events_streamed;
        self.events_handled += other.events_handled;
        self.queries_done += other.queries_done;
        if let Some(last) = other.last_ref {
            self.last_ref = Some(last);
        }
    }
}

/// Wraps whatever error a `ProjectionHandler` raised while handling a batch,
/// with the event reference being processed when it failed, if any
/// (spec.md §7: `ProjectorError{cause, offendingRef?}`).
#[derive(Debug, Snafu)]
#[snafu(display("projection failed{}: {cause}", offending_ref.as_ref().map(|r| format!(" at {r:?}")).unwrap_or_default()))]
pub struct ProjectorError {
    pub cause: Box<dyn std::error::Error + Send + Sync>,
    pub offending_ref: Option<EventReference>,
    #[snafu(implicit)]
    location: Location,
}

/// Applies matched events to a read model. `before_batch`/`after_batch`
/// bracket a non-empty batch; `cancel_batch` fires instead of `after_batch`
/// when `handle` (or `before_batch`) errors (spec.md §9 Design Notes: the
/// `Idle -> InBatch -> {Committed, Cancelled}` batch state machine).
pub trait ProjectionHandler: Send + Sync {
    fn handle(&self, event: &StoredEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    fn before_batch(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    fn after_batch(&self, last_ref: Option<&EventReference>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let _ = last_ref;
        Ok(())
    }

    fn cancel_batch(&self, cause: &(dyn std::error::Error + Send + Sync)) {
        let _ = cause;
    }
}

/// Drives a `ProjectionHandler` across batched reads from a `Storage`
/// backend, persisting a bookmark between runs when configured.
pub struct Projector<H: ProjectionHandler> {
    storage: Arc<dyn Storage>,
    projection: Projection,
    config: ProjectionConfig,
    handler: H,
    cursor: Option<EventReference>,
    bookmark_read: bool,
    metrics: Metrics,
}

impl<H: ProjectionHandler> Projector<H> {
    pub fn new(storage: Arc<dyn Storage>, projection: Projection, config: ProjectionConfig, handler: H) -> Self {
        let mut projector = Self {
            storage,
            projection,
            cursor: config.starting_after.clone(),
            config,
            handler,
            bookmark_read: false,
            metrics: Metrics::default(),
        };
        if matches!(
            projector.config.bookmark.as_ref().map(|b| b.read_frequency),
            Some(BookmarkReadFrequency::AtCreation)
        ) {
            projector.maybe_read_bookmark(true);
        }
        projector
    }

    /// Run-so-far cumulative counters (spec.md §4.8).
    pub fn metrics(&self) -> Metrics {
        self.metrics
    }

    /// Replays batches until one returns fewer events than `in_batches_of`,
    /// i.e. the replay has caught up to the end of the log. Returns this
    /// call's counters (not the cumulative run-wide total; see `metrics()`).
    pub fn run(&mut self) -> Result<Metrics, ProjectorError> {
        self.run_until_inner(None)
    }

    /// As `run`, but tightens every batch query with `until_if_earlier` so
    /// replay stops at `until` even if more matching events follow it
    /// (spec.md §4.8: time-bounded runs).
    pub fn run_until(&mut self, until: EventReference) -> Result<Metrics, ProjectorError> {
        self.run_until_inner(Some(until))
    }

    /// Runs exactly one batch and returns its counters, regardless of
    /// whether more matching events remain.
    pub fn run_single_batch(&mut self) -> Result<Metrics, ProjectorError> {
        self.maybe_read_bookmark(false);
        let (batch_metrics, _) = self.run_one_batch(None)?;
        Ok(batch_metrics)
    }

    fn run_until_inner(&mut self, until: Option<EventReference>) -> Result<Metrics, ProjectorError> {
        let mut call_metrics = Metrics::default();
        self.maybe_read_bookmark(true);
        loop {
            let (batch_metrics, full_batch) = self.run_one_batch(until)?;
            call_metrics.accumulate(batch_metrics);
            if !full_batch {
                break;
            }
        }
        Ok(call_metrics)
    }

    fn maybe_read_bookmark(&mut self, is_first_call: bool) {
        let Some(options) = self.config.bookmark.clone() else { return };
        let should_read = match options.read_frequency {
            BookmarkReadFrequency::Manual => false,
            BookmarkReadFrequency::AtCreation => !self.bookmark_read,
            BookmarkReadFrequency::BeforeFirst => is_first_call && !self.bookmark_read,
            BookmarkReadFrequency::BeforeEach => true,
        };
        if !should_read {
            return;
        }
        match self.storage.get_bookmark(&options.reader) {
            Ok(Some(bookmark)) => self.cursor = Some(bookmark.reference),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(target: LOG_TARGET, reader = %options.reader, %error, "failed to read projection bookmark, continuing from last known cursor");
            }
        }
        self.bookmark_read = true;
    }

    /// Runs one query-sized batch. Returns the batch's own counters and
    /// whether the batch was "full" (exactly `in_batches_of` events,
    /// meaning more may follow).
    fn run_one_batch(&mut self, until: Option<EventReference>) -> Result<(Metrics, bool), ProjectorError> {
        let mut query = self.projection.query.clone();
        if let Some(until) = until {
            query = query.until_if_earlier(until);
        }

        let limit = self.storage.effective_limit(Some(self.config.batch_size)).map_err(|error| {
            ProjectorErrorSnafu { cause: Box::new(error) as Box<dyn std::error::Error + Send + Sync>, offending_ref: self.cursor.clone() }.build()
        })?;

        let iterator = self
            .storage
            .query(&query, self.projection.stream_id.as_ref(), self.cursor.as_ref(), limit, Direction::Forward)
            .map_err(|error| {
                ProjectorErrorSnafu { cause: Box::new(error) as Box<dyn std::error::Error + Send + Sync>, offending_ref: self.cursor.clone() }.build()
            })?;

        let mut batch = Vec::new();
        for result in iterator {
            let event = result.map_err(|error| {
                ProjectorErrorSnafu { cause: Box::new(error) as Box<dyn std::error::Error + Send + Sync>, offending_ref: self.cursor.clone() }.build()
            })?;
            batch.push(event);
        }

        let mut batch_metrics = Metrics { queries_done: 1, ..Metrics::default() };

        if batch.is_empty() {
            self.metrics.accumulate(batch_metrics);
            return Ok((batch_metrics, false));
        }

        if let Err(cause) = self.handler.before_batch() {
            self.handler.cancel_batch(cause.as_ref());
            return Err(ProjectorErrorSnafu { cause, offending_ref: self.cursor.clone() }.build());
        }

        let full_batch = matches!(limit, Some(limit) if batch.len() == limit);
        let mut last_ref = None;

        for event in &batch {
            batch_metrics.events_streamed += 1;
            if let Err(cause) = self.handler.handle(event) {
                self.handler.cancel_batch(cause.as_ref());
                return Err(ProjectorErrorSnafu { cause, offending_ref: Some(event.reference.clone()) }.build());
            }
            batch_metrics.events_handled += 1;
            last_ref = Some(event.reference.clone());
        }

        if let Err(cause) = self.handler.after_batch(last_ref.as_ref()) {
            self.handler.cancel_batch(cause.as_ref());
            return Err(ProjectorErrorSnafu { cause, offending_ref: last_ref }.build());
        }

        batch_metrics.last_ref = last_ref.clone();
        self.cursor = last_ref.or(self.cursor.clone());
        self.persist_bookmark_if_needed(last_ref);
        self.metrics.accumulate(batch_metrics);

        Ok((batch_metrics, full_batch))
    }

    fn persist_bookmark_if_needed(&self, advanced_to: Option<EventReference>) {
        let (Some(options), Some(reference)) = (self.config.bookmark.as_ref(), advanced_to) else { return };
        if let Err(error) = self.storage.put_bookmark(&options.reader, &reference, &options.tags) {
            tracing::warn!(target: LOG_TARGET, reader = %options.reader, %error, "failed to persist projection bookmark");
        }
    }
}
