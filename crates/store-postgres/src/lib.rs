//! Relational (`PostgreSQL`) `Storage` backend (spec.md §6).
//!
//! Two tables, `events` and `bookmarks`, with the optimistic lock expressed
//! as a single `INSERT ... SELECT ... WHERE NOT EXISTS` statement per
//! spec.md §6 so the check and the write are one atomic round trip. Trigger
//! functions (`schema::ddl`) emit `pg_notify` on the channels spec.md §6
//! names; this backend itself dispatches append/bookmark notifications
//! in-process through the same `dcb_store::notify::Dispatcher` the
//! in-memory backend uses (see DESIGN.md) — one `PgStorage` handle already
//! satisfies the synchronous notification contract of spec.md §4.7 without a
//! running `LISTEN` task.
//!
//! The `Storage` port is synchronous; sqlx is async, so every method bridges
//! through `tokio::runtime::Handle::block_on`, the same pattern
//! `forgeerp-infra`'s `PostgresEventStore` and `PostgresCursorStore` use to
//! expose a sync trait over an async pool.

pub mod config;
pub mod error;
mod predicate;
pub mod schema;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dcb_core::{
    AppendCriteria, Bookmark, Event, EventId, EventQuery, EventReference, EventStreamId, TagSet,
};
use dcb_store::direction::Direction;
use dcb_store::error::{self, AppendError, QueryError};
use dcb_store::notify::{
    AppendNotification, BookmarkListener, BookmarkNotification, ConsistentListener, Dispatcher,
    EventualListener,
};
use dcb_store::query_engine;
use dcb_store::storage::{EventIterator, PreparedEvent, Storage, StoredEvent};
use dcb_store::append_engine;
use snafu::ResultExt;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};

pub use config::PgStorageConfig;
pub use error::ConfigError;

const LOG_TARGET: &str = "dcb::store::postgres";

const EVENT_COLUMNS: &str =
    "position, tx, id, stream_context, stream_purpose, type, stored_type, timestamp, data, tags";

/// Relational `Storage` backend. Thread-safe: every operation goes through
/// `sqlx::PgPool`'s own connection management.
pub struct PgStorage {
    pool: PgPool,
    config: PgStorageConfig,
    dispatcher: Dispatcher,
    stopped: AtomicBool,
}

impl PgStorage {
    /// Apply `schema::ddl` (idempotent) and wrap `pool` in a `Storage`.
    pub async fn connect(pool: PgPool, config: PgStorageConfig) -> Result<Self, ConfigError> {
        sqlx::raw_sql(&schema::ddl(&config))
            .execute(&pool)
            .await
            .context(error::config_error::MigrateSnafu)?;
        Ok(Self { pool, config, dispatcher: Dispatcher::new(), stopped: AtomicBool::new(false) })
    }

    /// Convenience constructor: connect from `DATABASE_URL` and migrate.
    pub async fn connect_from_env(config: PgStorageConfig) -> Result<Self, ConfigError> {
        let pool = config.connect_from_env().await?;
        Self::connect(pool, config).await
    }

    fn runtime_handle(&self) -> Result<tokio::runtime::Handle, Box<dyn std::error::Error + Send + Sync>> {
        tokio::runtime::Handle::try_current().map_err(|_| error::no_runtime())
    }

    async fn exists_matching(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        stream_id: &EventStreamId,
        query: &EventQuery,
        expected_last: Option<&EventReference>,
    ) -> Result<bool, sqlx::Error> {
        let mut builder: QueryBuilder<'_, sqlx::Postgres> =
            QueryBuilder::new(format!("SELECT EXISTS(SELECT 1 FROM {} WHERE ", self.config.events_table()));
        predicate::push_stream_scope(&mut builder, Some(stream_id));
        builder.push(" AND ");
        predicate::push_query_predicate(&mut builder, query);
        predicate::push_until(&mut builder, query);
        if let Some(expected) = expected_last {
            builder.push(" AND position > ");
            builder.push_bind(expected.position as i64);
        }
        builder.push(")");
        let row = builder.build().fetch_one(&mut **tx).await?;
        row.try_get::<bool, _>(0)
    }

    async fn find_by_idempotency_key(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        stream_id: &EventStreamId,
        key: &str,
    ) -> Result<Option<StoredEvent>, sqlx::Error> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM {} WHERE stream_context = $1 AND stream_purpose = $2 AND idempotency_key = $3",
            self.config.events_table()
        );
        let row = sqlx::query(&sql)
            .bind(stream_id.context().unwrap_or(""))
            .bind(stream_id.purpose().unwrap_or(""))
            .bind(key)
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn append_async(
        &self,
        criteria: &AppendCriteria,
        stream_id: &EventStreamId,
        events: Vec<PreparedEvent>,
    ) -> Result<Vec<StoredEvent>, AppendError> {
        let idempotency_key =
            append_engine::validate_batch_shape(criteria, &events)?.map(str::to_string);

        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(error::boxed)
            .context(error::append_error::StorageErrorSnafu)?;

        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = self
                .find_by_idempotency_key(&mut transaction, stream_id, key)
                .await
                .map_err(error::boxed)
                .context(error::append_error::StorageErrorSnafu)?
            {
                transaction.commit().await.map_err(error::boxed).context(error::append_error::StorageErrorSnafu)?;
                tracing::debug!(target: LOG_TARGET, %key, "idempotent append short-circuited");
                return Ok(vec![existing]);
            }
        }

        if !criteria.is_unconditional() {
            let violated = self
                .exists_matching(&mut transaction, stream_id, &criteria.query, criteria.expected_last.as_ref())
                .await
                .map_err(error::boxed)
                .context(error::append_error::StorageErrorSnafu)?;
            if violated {
                transaction.rollback().await.map_err(error::boxed).context(error::append_error::StorageErrorSnafu)?;
                return error::append_error::OptimisticLockViolatedSnafu {
                    query: criteria.query.clone(),
                    expected_last: criteria.expected_last.clone(),
                }
                .fail();
            }
        }

        let tx_number: i64 = sqlx::query_scalar(&format!("SELECT nextval('{}')", self.config.tx_seq()))
            .fetch_one(&mut *transaction)
            .await
            .map_err(error::boxed)
            .context(error::append_error::StorageErrorSnafu)?;
        let timestamp: DateTime<Utc> = Utc::now();

        let insert_sql = format!(
            "INSERT INTO {} (tx, id, stream_context, stream_purpose, type, stored_type, idempotency_key, timestamp, data, tags) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10) RETURNING position",
            self.config.events_table()
        );

        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            let uuid = uuid::Uuid::now_v7();
            let id = EventId::from(uuid);
            let tags: Vec<String> = event.tags.iter().map(ToString::to_string).collect();
            let row = sqlx::query(&insert_sql)
                .bind(tx_number)
                .bind(uuid)
                .bind(stream_id.context().unwrap_or(""))
                .bind(stream_id.purpose().unwrap_or(""))
                .bind(&event.event_type)
                .bind(&event.event_type)
                .bind(idempotency_key.as_deref())
                .bind(timestamp)
                .bind(&event.data)
                .bind(&tags)
                .fetch_one(&mut *transaction)
                .await
                .map_err(error::boxed)
                .context(error::append_error::StorageErrorSnafu)?;
            let position: i64 = row
                .try_get("position")
                .map_err(error::boxed)
                .context(error::append_error::StorageErrorSnafu)?;
            let reference = EventReference::new(id, position as u64, tx_number as u64);
            stored.push(Event::as_written(
                stream_id.clone(),
                event.event_type,
                reference,
                event.data,
                event.tags,
                timestamp,
            ));
        }

        transaction.commit().await.map_err(error::boxed).context(error::append_error::StorageErrorSnafu)?;

        self.dispatcher
            .notify_consistent(stream_id, &stored)
            .context(error::append_error::StorageErrorSnafu)?;
        if let Some(last) = stored.last() {
            self.dispatcher.notify_append(AppendNotification {
                stream: stream_id.clone(),
                last_ref: last.reference.clone(),
            });
        }

        Ok(stored)
    }

    async fn query_async(
        &self,
        query: &EventQuery,
        stream_id: Option<&EventStreamId>,
        after: Option<&EventReference>,
        limit: Option<usize>,
        direction: Direction,
    ) -> Result<(Vec<StoredEvent>, bool), QueryError> {
        let effective_limit = query_engine::effective_limit(limit, self.config.absolute_limit)?;
        let detect_overrun = limit.is_none() && self.config.absolute_limit.is_some();

        let mut builder: QueryBuilder<'_, sqlx::Postgres> =
            QueryBuilder::new(format!("SELECT {EVENT_COLUMNS} FROM {} WHERE ", self.config.events_table()));
        predicate::push_stream_scope(&mut builder, stream_id);
        builder.push(" AND ");
        predicate::push_query_predicate(&mut builder, query);
        predicate::push_until(&mut builder, query);
        if let Some(after) = after {
            match direction {
                Direction::Forward => builder.push(" AND position > "),
                Direction::Backward => builder.push(" AND position < "),
            };
            builder.push_bind(after.position as i64);
        }
        match direction {
            Direction::Forward => builder.push(" ORDER BY position ASC"),
            Direction::Backward => builder.push(" ORDER BY position DESC"),
        };
        if let Some(limit) = effective_limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(error::boxed)
            .context(error::query_error::StorageErrorSnafu)?;

        let mut stored = Vec::with_capacity(rows.len());
        for row in &rows {
            stored.push(row_to_event(row).map_err(error::boxed).context(error::query_error::StorageErrorSnafu)?);
        }

        if detect_overrun {
            if let Some(absolute) = self.config.absolute_limit {
                if stored.len() > absolute {
                    return error::query_error::LimitExceededSnafu.fail();
                }
            }
        }

        Ok((stored, detect_overrun))
    }
}

fn row_to_event(row: &PgRow) -> Result<StoredEvent, sqlx::Error> {
    let position: i64 = row.try_get("position")?;
    let tx: i64 = row.try_get("tx")?;
    let id: uuid::Uuid = row.try_get("id")?;
    let stream_context: String = row.try_get("stream_context")?;
    let stream_purpose: String = row.try_get("stream_purpose")?;
    let event_type: String = row.try_get("type")?;
    let stored_type: String = row.try_get("stored_type")?;
    let timestamp: DateTime<Utc> = row.try_get("timestamp")?;
    let data: serde_json::Value = row.try_get("data")?;
    let tags: Vec<String> = row.try_get("tags")?;

    Ok(Event {
        stream: EventStreamId::concrete(stream_context, stream_purpose),
        event_type,
        stored_type,
        reference: EventReference::new(EventId::from(id), position as u64, tx as u64),
        data,
        tags: TagSet::parse_all(tags.iter().map(String::as_str)),
        timestamp,
    })
}

impl Storage for PgStorage {
    fn query(
        &self,
        query: &EventQuery,
        stream_id: Option<&EventStreamId>,
        after: Option<&EventReference>,
        limit: Option<usize>,
        direction: Direction,
    ) -> Result<EventIterator, QueryError> {
        if self.stopped.load(Ordering::SeqCst) {
            return error::query_error::StorageClosedSnafu.fail();
        }
        let handle = self.runtime_handle().context(error::query_error::StorageErrorSnafu)?;
        let (stored, _) = handle.block_on(self.query_async(query, stream_id, after, limit, direction))?;
        Ok(Box::new(stored.into_iter().map(Ok)))
    }

    fn append(
        &self,
        criteria: &AppendCriteria,
        stream_id: &EventStreamId,
        events: Vec<PreparedEvent>,
    ) -> Result<Vec<StoredEvent>, AppendError> {
        if self.stopped.load(Ordering::SeqCst) {
            return error::append_error::StorageClosedSnafu.fail();
        }
        let handle = self
            .runtime_handle()
            .context(error::append_error::StorageErrorSnafu)?;
        handle.block_on(self.append_async(criteria, stream_id, events))
    }

    fn get_event_by_id(&self, id: &EventId) -> Result<Option<StoredEvent>, QueryError> {
        if self.stopped.load(Ordering::SeqCst) {
            return error::query_error::StorageClosedSnafu.fail();
        }
        let handle = self.runtime_handle().context(error::query_error::StorageErrorSnafu)?;
        let sql = format!("SELECT {EVENT_COLUMNS} FROM {} WHERE id = $1", self.config.events_table());
        let uuid = id.as_str().parse::<uuid::Uuid>().ok();
        handle.block_on(async move {
            let Some(uuid) = uuid else { return Ok(None) };
            let row = sqlx::query(&sql)
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await
                .map_err(error::boxed)
                .context(error::query_error::StorageErrorSnafu)?;
            row.as_ref().map(row_to_event).transpose().map_err(error::boxed).context(error::query_error::StorageErrorSnafu)
        })
    }

    fn put_bookmark(&self, reader: &str, reference: &EventReference, tags: &TagSet) -> Result<(), QueryError> {
        if self.stopped.load(Ordering::SeqCst) {
            return error::query_error::StorageClosedSnafu.fail();
        }
        let handle = self.runtime_handle().context(error::query_error::StorageErrorSnafu)?;
        let sql = format!(
            "INSERT INTO {bookmarks} (reader, position, id, updated_at, updated_tags) \
             VALUES ($1,$2,$3,$4,$5) \
             ON CONFLICT (reader) DO UPDATE SET position = EXCLUDED.position, id = EXCLUDED.id, \
             updated_at = EXCLUDED.updated_at, updated_tags = EXCLUDED.updated_tags",
            bookmarks = self.config.bookmarks_table()
        );
        let tag_texts: Vec<String> = tags.iter().map(ToString::to_string).collect();
        let uuid: uuid::Uuid = reference
            .id
            .as_str()
            .parse()
            .map_err(|_| -> Box<dyn std::error::Error + Send + Sync> {
                "bookmark reference id is not a uuid".into()
            })
            .context(error::query_error::StorageErrorSnafu)?;
        handle.block_on(async move {
            sqlx::query(&sql)
                .bind(reader)
                .bind(reference.position as i64)
                .bind(uuid)
                .bind(Utc::now())
                .bind(&tag_texts)
                .execute(&self.pool)
                .await
                .map_err(error::boxed)
                .context(error::query_error::StorageErrorSnafu)
        })?;
        self.dispatcher
            .notify_bookmark(BookmarkNotification { reader: reader.to_string(), reference: reference.clone() });
        Ok(())
    }

    fn get_bookmark(&self, reader: &str) -> Result<Option<Bookmark>, QueryError> {
        if self.stopped.load(Ordering::SeqCst) {
            return error::query_error::StorageClosedSnafu.fail();
        }
        let handle = self.runtime_handle().context(error::query_error::StorageErrorSnafu)?;
        let sql = format!(
            "SELECT b.position, b.id, b.updated_tags FROM {bookmarks} b WHERE b.reader = $1",
            bookmarks = self.config.bookmarks_table()
        );
        handle.block_on(async move {
            let row = sqlx::query(&sql)
                .bind(reader)
                .fetch_optional(&self.pool)
                .await
                .map_err(error::boxed)
                .context(error::query_error::StorageErrorSnafu)?;
            let Some(row) = row else { return Ok(None) };
            let position: i64 = row.try_get("position").map_err(error::boxed).context(error::query_error::StorageErrorSnafu)?;
            let id: uuid::Uuid = row.try_get("id").map_err(error::boxed).context(error::query_error::StorageErrorSnafu)?;
            let tags: Vec<String> = row.try_get("updated_tags").map_err(error::boxed).context(error::query_error::StorageErrorSnafu)?;
            let reference = EventReference::new(EventId::from(id), position as u64, position as u64);
            Ok(Some(Bookmark::new(reader, reference, TagSet::parse_all(tags.iter().map(String::as_str)))))
        })
    }

    fn remove_bookmark(&self, reader: &str) -> Result<Option<EventReference>, QueryError> {
        if self.stopped.load(Ordering::SeqCst) {
            return error::query_error::StorageClosedSnafu.fail();
        }
        let existing = self.get_bookmark(reader)?;
        let handle = self.runtime_handle().context(error::query_error::StorageErrorSnafu)?;
        let sql = format!("DELETE FROM {bookmarks} WHERE reader = $1", bookmarks = self.config.bookmarks_table());
        handle.block_on(async move {
            sqlx::query(&sql)
                .bind(reader)
                .execute(&self.pool)
                .await
                .map_err(error::boxed)
                .context(error::query_error::StorageErrorSnafu)
        })?;
        Ok(existing.map(|b| b.reference))
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
        self.config.absolute_limit
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.dispatcher.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_table_sql_uses_configured_prefix() {
        let config = PgStorageConfig::default().with_table_prefix("acme_").unwrap();
        assert_eq!(config.events_table(), "acme_events");
    }
}
