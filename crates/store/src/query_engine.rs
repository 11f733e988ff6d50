//! Query engine (spec.md §4.4): pagination, `after`/`until` bounds, result
//! limits, shared by backends that need an in-process filtering pass over an
//! already-ordered event sequence (the in-memory backend uses this
//! directly; a SQL backend expresses the same semantics in its query text).

use dcb_core::{EventQuery, EventReference};

use crate::direction::Direction;
use crate::error::{self, QueryError};
use crate::storage::StoredEvent;

/// Reconciles a user-requested soft limit with the storage-wide absolute
/// limit (spec.md §4.2):
/// - `soft` unset: use `absolute + 1` (to detect overrun), or unlimited if
///   there is no absolute limit.
/// - both set and `soft <= absolute`: use `soft`.
/// - `soft > absolute`: fail with `LimitExceeded`.
pub fn effective_limit(soft: Option<usize>, absolute: Option<usize>) -> Result<Option<usize>, QueryError> {
    match (soft, absolute) {
        (None, None) => Ok(None),
        (None, Some(abs)) => Ok(Some(abs.saturating_add(1))),
        (Some(soft), None) => Ok(Some(soft)),
        (Some(soft), Some(abs)) if soft <= abs => Ok(Some(soft)),
        (Some(_), Some(_)) => error::query_error::LimitExceededSnafu.fail(),
    }
}

/// `true` iff `reference` is strictly after `after` in `direction` (`after`
/// resolved by position only, regardless of `tx` — spec.md §9 open
/// question).
fn is_strictly_after(reference: &EventReference, after: &EventReference, direction: Direction) -> bool {
    match direction {
        Direction::Forward => reference.position > after.position,
        Direction::Backward => reference.position < after.position,
    }
}

/// Filters an already correctly-ordered source sequence according to
/// `query`, `after`, and `limit`, enforcing the absolute-limit overrun check
/// (spec.md §4.2, §4.4). `source` must already be ordered per `direction`
/// and scoped to the requested stream; this function applies only the
/// cursor/predicate/limit logic, so it is reusable across backends.
pub fn run<I>(
    source: I,
    query: &EventQuery,
    after: Option<&EventReference>,
    direction: Direction,
    soft_limit: Option<usize>,
    absolute_limit: Option<usize>,
) -> Result<Vec<StoredEvent>, QueryError>
where
    I: IntoIterator<Item = StoredEvent>,
{
    let limit = effective_limit(soft_limit, absolute_limit)?;
    let detect_overrun = soft_limit.is_none() && absolute_limit.is_some();

    let mut out = Vec::new();
    for event in source.into_iter() {
        if let Some(after) = after {
            if !is_strictly_after(&event.reference, after, direction) {
                continue;
            }
        }
        if !query.matches(&event) {
            continue;
        }
        out.push(event);
        if let Some(limit) = limit {
            if out.len() >= limit {
                break;
            }
        }
    }

    if detect_overrun {
        if let Some(absolute) = absolute_limit {
            if out.len() > absolute {
                return error::query_error::LimitExceededSnafu.fail();
            }
        }
    }

    Ok(out)
}
