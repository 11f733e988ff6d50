//! Translates the tag/query model (spec.md §3, §4.1) into the SQL predicate
//! fragments the append engine's optimistic-lock check and the query engine
//! both need, built with `sqlx::QueryBuilder` so every value is still bound
//! as a parameter rather than interpolated.

use dcb_core::{EventQuery, EventStreamId, QueryItem, TypeFilter};
use sqlx::{Postgres, QueryBuilder};

/// `a.canRead(b)` expressed as SQL over the `stream_context`/`stream_purpose`
/// columns (spec.md §3): an absent component is a wildcard and admits any
/// value, a present one must match exactly.
pub fn push_stream_scope(builder: &mut QueryBuilder<'_, Postgres>, stream_id: Option<&EventStreamId>) {
    let Some(stream_id) = stream_id else {
        builder.push("TRUE");
        return;
    };
    builder.push("(");
    match stream_id.context() {
        Some(context) => {
            builder.push("stream_context = ");
            builder.push_bind(context.to_string());
        }
        None => {
            builder.push("TRUE");
        }
    }
    builder.push(" AND ");
    match stream_id.purpose() {
        Some(purpose) => {
            builder.push("stream_purpose = ");
            builder.push_bind(purpose.to_string());
        }
        None => {
            builder.push("TRUE");
        }
    }
    builder.push(")");
}

/// `EventQuery::matches` (spec.md §4.1), minus the `until` gate (pushed
/// separately by `push_until` since append criteria need it combined with
/// `expected_last` differently than a plain read query does).
pub fn push_query_predicate(builder: &mut QueryBuilder<'_, Postgres>, query: &EventQuery) {
    match query {
        EventQuery::MatchAll => {
            builder.push("TRUE");
        }
        EventQuery::MatchNone => {
            builder.push("FALSE");
        }
        EventQuery::Items { items, .. } => {
            if items.is_empty() {
                builder.push("FALSE");
                return;
            }
            builder.push("(");
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    builder.push(" OR ");
                }
                push_item_predicate(builder, item);
            }
            builder.push(")");
        }
    }
}

fn push_item_predicate(builder: &mut QueryBuilder<'_, Postgres>, item: &QueryItem) {
    builder.push("(");
    match item.types.as_ref() {
        None | Some(TypeFilter::Any) => {
            builder.push("TRUE");
        }
        Some(TypeFilter::Named(names)) => {
            builder.push("type = ANY(");
            builder.push_bind(names.clone());
            builder.push(")");
        }
    }
    builder.push(" AND ");
    match item.tags.as_ref() {
        None => {
            builder.push("TRUE");
        }
        Some(tags) if tags.is_empty() => {
            builder.push("TRUE");
        }
        Some(tags) => {
            let texts: Vec<String> = tags.iter().map(ToString::to_string).collect();
            builder.push("tags @> ");
            builder.push_bind(texts);
        }
    }
    builder.push(")");
}

/// `query.until()` is inclusive by `position` (spec.md §3, §4.4).
pub fn push_until(builder: &mut QueryBuilder<'_, Postgres>, query: &EventQuery) {
    if let Some(until) = query.until() {
        builder.push(" AND position <= ");
        builder.push_bind(until.position as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcb_core::TagSet;

    #[test]
    fn match_all_compiles_to_true() {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT 1 WHERE ");
        push_query_predicate(&mut builder, &EventQuery::match_all());
        assert!(builder.sql().ends_with("TRUE"));
    }

    #[test]
    fn items_compile_to_disjunction() {
        let query = EventQuery::items([
            QueryItem::new().with_types(TypeFilter::named(["A"])),
            QueryItem::new().with_tags(TagSet::parse_all(["account:1"])),
        ]);
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT 1 WHERE ");
        push_query_predicate(&mut builder, &query);
        assert!(builder.sql().contains(" OR "));
    }

    #[test]
    fn wildcard_stream_scope_is_unconstrained() {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT 1 WHERE ");
        push_stream_scope(&mut builder, Some(&EventStreamId::wildcard()));
        assert_eq!(builder.sql(), "SELECT 1 WHERE (TRUE AND TRUE)");
    }
}
