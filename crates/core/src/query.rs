//! The query model (spec.md §3 "Query model", §4.1).

use serde::{Deserialize, Serialize};

use crate::id::EventReference;
use crate::tag::TagSet;

/// A finite set of admitted type names, or the universal "any type" filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeFilter {
    /// Matches every type name (the distinguished universal, spec.md §4.1).
    Any,
    /// Matches only the listed type names.
    Named(Vec<String>),
}

impl TypeFilter {
    pub fn any() -> Self {
        Self::Any
    }

    pub fn named(types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Named(types.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, type_name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Named(names) => names.iter().any(|n| n == type_name),
        }
    }
}

/// A single disjunct of an `items` query: `(types?, tags?)` (spec.md §3).
///
/// Absent `types`/`tags` behave as the universal filter for that dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryItem {
    pub types: Option<TypeFilter>,
    pub tags: Option<TagSet>,
}

impl QueryItem {
    pub fn new() -> Self {
        Self { types: None, tags: None }
    }

    pub fn with_types(mut self, types: TypeFilter) -> Self {
        self.types = Some(types);
        self
    }

    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = Some(tags);
        self
    }

    /// `(types absent ∨ event.type ∈ types) ∧ (tags absent ∨ event.tags ⊇ item.tags)`.
    pub fn matches(&self, type_name: &str, event_tags: &TagSet) -> bool {
        let type_ok = self.types.as_ref().map_or(true, |f| f.matches(type_name));
        let tags_ok = self.tags.as_ref().map_or(true, |t| event_tags.contains_all(t));
        type_ok && tags_ok
    }
}

impl Default for QueryItem {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal view of an event needed to evaluate a query predicate, decoupled
/// from any particular storage representation.
pub trait Matchable {
    fn event_type(&self) -> &str;
    fn event_tags(&self) -> &TagSet;
    fn event_reference(&self) -> &EventReference;
}

/// One of the three canonical shapes from spec.md §3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventQuery {
    /// Matches any event.
    MatchAll,
    /// Matches no event; the sentinel meaning "append unconditionally".
    MatchNone,
    /// Disjunction of items, optionally bounded by an inclusive `until`.
    Items { items: Vec<QueryItem>, until: Option<EventReference> },
}

impl EventQuery {
    pub fn match_all() -> Self {
        Self::MatchAll
    }

    pub fn match_none() -> Self {
        Self::MatchNone
    }

    pub fn items(items: impl IntoIterator<Item = QueryItem>) -> Self {
        Self::Items { items: items.into_iter().collect(), until: None }
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, Self::MatchAll)
    }

    pub fn is_match_none(&self) -> bool {
        matches!(self, Self::MatchNone)
    }

    pub fn until(&self) -> Option<&EventReference> {
        match self {
            Self::Items { until, .. } => until.as_ref(),
            _ => None,
        }
    }

    /// Implements the predicate of spec.md §3/§4.1. Short-circuits on the
    /// first matching item for `Items`; `until` is the final gate.
    pub fn matches<E: Matchable>(&self, event: &E) -> bool {
        match self {
            Self::MatchAll => true,
            Self::MatchNone => false,
            Self::Items { items, until } => {
                if let Some(until) = until {
                    let r = event.event_reference();
                    if !(r.happened_before(until) || r == until) {
                        return false;
                    }
                }
                items.iter().any(|item| item.matches(event.event_type(), event.event_tags()))
            }
        }
    }

    /// Item-union of two queries (spec.md §4.1). `MatchAll` absorbs;
    /// `MatchNone` is the identity.
    pub fn combine_with(self, other: EventQuery) -> EventQuery {
        match (self, other) {
            (Self::MatchAll, _) | (_, Self::MatchAll) => Self::MatchAll,
            (Self::MatchNone, q) | (q, Self::MatchNone) => q,
            (
                Self::Items { items: mut a, until: until_a },
                Self::Items { items: mut b, until: until_b },
            ) => {
                a.append(&mut b);
                let until = match (until_a, until_b) {
                    (Some(x), Some(y)) => Some(if y.happened_before(&x) { y } else { x }),
                    (Some(x), None) | (None, Some(x)) => Some(x),
                    (None, None) => None,
                };
                Self::Items { items: a, until }
            }
        }
    }

    /// Tighten `until` to whichever of the current bound and `r` is earlier
    /// (spec.md §4.1, "untilIfEarlier"). A no-op for `MatchAll`/`MatchNone`.
    pub fn until_if_earlier(self, r: EventReference) -> EventQuery {
        match self {
            Self::Items { items, until } => {
                let until = match until {
                    Some(existing) if existing.happened_before(&r) => Some(existing),
                    _ => Some(r),
                };
                Self::Items { items, until }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EventId;

    struct Fixture {
        type_name: String,
        tags: TagSet,
        reference: EventReference,
    }

    impl Matchable for Fixture {
        fn event_type(&self) -> &str {
            &self.type_name
        }
        fn event_tags(&self) -> &TagSet {
            &self.tags
        }
        fn event_reference(&self) -> &EventReference {
            &self.reference
        }
    }

    fn fixture(type_name: &str, tags: &[&str], position: u64) -> Fixture {
        Fixture {
            type_name: type_name.to_string(),
            tags: TagSet::parse_all(tags.iter().copied()),
            reference: EventReference::new(EventId::new(), position, position),
        }
    }

    #[test]
    fn match_all_matches_everything() {
        assert!(EventQuery::match_all().matches(&fixture("Anything", &[], 1)));
    }

    #[test]
    fn match_none_matches_nothing() {
        assert!(!EventQuery::match_none().matches(&fixture("Anything", &[], 1)));
    }

    #[test]
    fn items_match_by_type_and_tag_subset() {
        let q = EventQuery::items([QueryItem::new()
            .with_types(TypeFilter::named(["AccountOpened"]))
            .with_tags(TagSet::parse_all(["account:1"]))]);
        assert!(q.matches(&fixture("AccountOpened", &["account:1", "currency:usd"], 1)));
        assert!(!q.matches(&fixture("AccountOpened", &["account:2"], 1)));
        assert!(!q.matches(&fixture("MoneyDeposited", &["account:1"], 1)));
    }

    #[test]
    fn until_is_inclusive_gate() {
        let until = EventReference::new(EventId::new(), 4, 1);
        let q = EventQuery::items([QueryItem::new()]).until_if_earlier(until.clone());
        assert!(q.matches(&fixture("Any", &[], 4)));
        assert!(q.matches(&fixture("Any", &[], 3)));
        assert!(!q.matches(&fixture("Any", &[], 5)));
    }

    #[test]
    fn combine_with_unions_items() {
        let a = EventQuery::items([QueryItem::new().with_types(TypeFilter::named(["A"]))]);
        let b = EventQuery::items([QueryItem::new().with_types(TypeFilter::named(["B"]))]);
        let combined = a.combine_with(b);
        assert!(combined.matches(&fixture("A", &[], 1)));
        assert!(combined.matches(&fixture("B", &[], 1)));
        assert!(!combined.matches(&fixture("C", &[], 1)));
    }

    #[test]
    fn combine_with_match_all_absorbs() {
        let a = EventQuery::items([QueryItem::new().with_types(TypeFilter::named(["A"]))]);
        let combined = a.combine_with(EventQuery::match_all());
        assert!(combined.is_match_all());
    }

    #[test]
    fn until_if_earlier_keeps_the_tighter_bound() {
        let q = EventQuery::items([QueryItem::new()]).until_if_earlier(EventReference::new(
            EventId::new(),
            10,
            1,
        ));
        let tightened = q.until_if_earlier(EventReference::new(EventId::new(), 4, 1));
        assert_eq!(tightened.until().unwrap().position, 4);
    }
}
