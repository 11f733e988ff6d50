//! Event identifiers and references (spec.md §3 "Event identifier" / "Event reference").

use core::cmp::Ordering;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, globally unique identifier of a stored event.
///
/// Recommended representation is a UUID, but the type itself is an opaque
/// non-empty string so storage backends remain free to mint their own ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Mint a fresh, UUIDv7 (time-ordered) event id.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wrap an existing non-empty string as an `EventId`.
    ///
    /// Returns `None` for an empty string; `EventId` is non-empty by
    /// construction (spec.md §3).
    pub fn from_string(s: impl Into<String>) -> Option<Self> {
        let s = s.into();
        if s.is_empty() { None } else { Some(Self(s)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for EventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for EventId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

impl FromStr for EventId {
    type Err = EmptyEventId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s).ok_or(EmptyEventId)
    }
}

/// Error returned when constructing an `EventId` from an empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event id must be non-empty")]
pub struct EmptyEventId;

/// `(id, position, tx)` — identifies and orders a stored event (spec.md §3, §9).
///
/// `position` is the store-wide strictly monotonic position assigned at
/// append; `tx` is the monotonic batch identifier shared by every event of a
/// single append call. Ordering is primarily by `tx`, then by `position` —
/// this is what lets one append batch become visible atomically even when
/// positions from concurrent appenders interleave.
///
/// Backends that cannot supply a real `tx` must set `tx = position`, which
/// degrades ordering to position-only (spec.md §9, "Open questions").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventReference {
    pub id: EventId,
    pub position: u64,
    pub tx: u64,
}

impl EventReference {
    pub fn new(id: EventId, position: u64, tx: u64) -> Self {
        Self { id, position, tx }
    }

    /// `true` iff `self` occurred strictly before `other` under the
    /// `(tx, position)` total order (spec.md §3, §8 invariant 5).
    pub fn happened_before(&self, other: &EventReference) -> bool {
        (self.tx, self.position) < (other.tx, other.position)
    }

    /// `true` iff `self` occurred strictly after `other`.
    pub fn happened_after(&self, other: &EventReference) -> bool {
        other.happened_before(self)
    }
}

impl PartialOrd for EventReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventReference {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.tx, self.position).cmp(&(other.tx, other.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(position: u64, tx: u64) -> EventReference {
        EventReference::new(EventId::new(), position, tx)
    }

    #[test]
    fn orders_by_tx_then_position() {
        let a = r(5, 1);
        let b = r(1, 2);
        assert!(a.happened_before(&b));
        assert!(!b.happened_before(&a));
    }

    #[test]
    fn orders_by_position_within_tx() {
        let a = r(1, 1);
        let b = r(2, 1);
        assert!(a.happened_before(&b));
        assert!(b.happened_after(&a));
    }

    #[test]
    fn empty_event_id_rejected() {
        assert!(EventId::from_string("").is_none());
        assert!("".parse::<EventId>().is_err());
    }
}
