//! DDL for the relational backend (spec.md §6): two tables, trigger-driven
//! pub/sub channels, and table-name prefixing.
//!
//! `tx` has no counterpart in the literal spec.md §6 table listing (which
//! only carries `position`), but the data model (spec.md §3) requires a
//! `tx` shared by every event of one append batch; this schema adds a `tx`
//! column and a companion sequence so concurrent batches still get
//! contiguous positions with one shared `tx` each (documented in
//! DESIGN.md).

use crate::config::PgStorageConfig;

/// Render the full schema DDL for `config`'s (possibly prefixed) table set.
/// Idempotent: safe to run against an already-migrated database.
pub fn ddl(config: &PgStorageConfig) -> String {
    let events = config.events_table();
    let bookmarks = config.bookmarks_table();
    let tx_seq = config.tx_seq();
    let appended_channel = config.appended_channel();
    let bookmark_channel = config.bookmark_channel();
    let notify_fn = format!("{}notify_event_appended", config.table_prefix.as_deref().unwrap_or(""));
    let notify_bookmark_fn = format!("{}notify_bookmark_placed", config.table_prefix.as_deref().unwrap_or(""));
    let trigger_appended = format!("{}trg_event_appended", config.table_prefix.as_deref().unwrap_or(""));
    let trigger_bookmark = format!("{}trg_bookmark_placed", config.table_prefix.as_deref().unwrap_or(""));

    format!(
        r#"
CREATE SEQUENCE IF NOT EXISTS {tx_seq};

CREATE TABLE IF NOT EXISTS {events} (
    position BIGSERIAL PRIMARY KEY,
    tx BIGINT NOT NULL,
    id UUID UNIQUE NOT NULL,
    stream_context TEXT NOT NULL,
    stream_purpose TEXT NOT NULL,
    type TEXT NOT NULL,
    stored_type TEXT NOT NULL,
    idempotency_key TEXT,
    timestamp TIMESTAMPTZ NOT NULL,
    data JSON NOT NULL,
    erasable_data JSON,
    tags TEXT[] NOT NULL DEFAULT '{{}}'
);

CREATE INDEX IF NOT EXISTS {events}_stream_type_position_idx
    ON {events} (stream_context, stream_purpose, type, position);

CREATE INDEX IF NOT EXISTS {events}_tags_gin_idx ON {events} USING GIN (tags);

CREATE INDEX IF NOT EXISTS {events}_stream_position_idx
    ON {events} (stream_context, stream_purpose, position);

CREATE UNIQUE INDEX IF NOT EXISTS {events}_idempotency_idx
    ON {events} (stream_context, stream_purpose, idempotency_key)
    WHERE idempotency_key IS NOT NULL;

CREATE TABLE IF NOT EXISTS {bookmarks} (
    reader VARCHAR PRIMARY KEY,
    position BIGINT NOT NULL,
    id UUID NOT NULL REFERENCES {events} (id) ON DELETE CASCADE,
    updated_at TIMESTAMPTZ NOT NULL,
    updated_tags TEXT[] NOT NULL DEFAULT '{{}}'
);

CREATE OR REPLACE FUNCTION {notify_fn}() RETURNS trigger AS $$
BEGIN
    PERFORM pg_notify(
        '{appended_channel}',
        json_build_object(
            'streamContext', NEW.stream_context,
            'streamPurpose', NEW.stream_purpose,
            'eventPosition', NEW.position,
            'eventId', NEW.id,
            'eventType', NEW.type
        )::text
    );
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS {trigger_appended} ON {events};
CREATE TRIGGER {trigger_appended}
    AFTER INSERT ON {events}
    FOR EACH ROW EXECUTE FUNCTION {notify_fn}();

CREATE OR REPLACE FUNCTION {notify_bookmark_fn}() RETURNS trigger AS $$
BEGIN
    PERFORM pg_notify(
        '{bookmark_channel}',
        json_build_object(
            'reader', NEW.reader,
            'eventPosition', NEW.position,
            'eventId', NEW.id
        )::text
    );
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS {trigger_bookmark} ON {bookmarks};
CREATE TRIGGER {trigger_bookmark}
    AFTER INSERT OR UPDATE ON {bookmarks}
    FOR EACH ROW EXECUTE FUNCTION {notify_bookmark_fn}();
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ddl_substitutes_table_prefix() {
        let config = PgStorageConfig::default().with_table_prefix("acme_").unwrap();
        let sql = ddl(&config);
        assert!(sql.contains("acme_events"));
        assert!(sql.contains("acme_bookmarks"));
        assert!(sql.contains("acme_trg_event_appended"));
    }

    #[test]
    fn ddl_with_no_prefix_uses_bare_names() {
        let sql = ddl(&PgStorageConfig::default());
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS events"));
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS bookmarks"));
    }
}
