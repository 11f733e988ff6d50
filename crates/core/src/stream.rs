//! Stream identifiers (spec.md §3 "Stream identifier").

use serde::{Deserialize, Serialize};

/// `(context, purpose)` where either may be absent, meaning "wildcard".
///
/// Wildcard ids are read-only: `canAppendTo` never admits them as a write
/// target (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventStreamId {
    context: Option<String>,
    purpose: Option<String>,
}

impl EventStreamId {
    /// A fully concrete stream id. Panics are never raised here; non-empty
    /// strings are the caller's responsibility per spec.md §3 ("both are
    /// non-empty strings for persisted events").
    pub fn concrete(context: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self { context: Some(context.into()), purpose: Some(purpose.into()) }
    }

    pub fn any_context(purpose: impl Into<String>) -> Self {
        Self { context: None, purpose: Some(purpose.into()) }
    }

    pub fn any_purpose(context: impl Into<String>) -> Self {
        Self { context: Some(context.into()), purpose: None }
    }

    pub fn wildcard() -> Self {
        Self { context: None, purpose: None }
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn purpose(&self) -> Option<&str> {
        self.purpose.as_deref()
    }

    pub fn is_wildcard(&self) -> bool {
        self.context.is_none() || self.purpose.is_none()
    }

    /// `true` iff `self` is fully concrete (no wildcard component).
    pub fn is_concrete(&self) -> bool {
        !self.is_wildcard()
    }

    fn component_can_read(mine: Option<&str>, other: Option<&str>) -> bool {
        match mine {
            None => true,
            Some(m) => other == Some(m),
        }
    }

    /// `a.canRead(b)` iff `a.context` is wildcard or equals `b.context`, and
    /// the same for purpose (spec.md §3).
    pub fn can_read(&self, other: &EventStreamId) -> bool {
        Self::component_can_read(self.context.as_deref(), other.context.as_deref())
            && Self::component_can_read(self.purpose.as_deref(), other.purpose.as_deref())
    }

    /// `a.canAppendTo(b)` iff either equal, or `a` is a concretization of `b`
    /// (same non-null context, `b.purpose` wildcard, `a.purpose` concrete).
    pub fn can_append_to(&self, other: &EventStreamId) -> bool {
        if self == other {
            return true;
        }
        self.is_concrete()
            && other.context.is_some()
            && other.purpose.is_none()
            && self.context == other.context
    }

    /// Returns a new id concretized to `purpose`, keeping the current
    /// context. Used for `anyPurpose` streams that need to append to
    /// specific instances (spec.md §4.5).
    pub fn with_purpose(&self, purpose: impl Into<String>) -> EventStreamId {
        EventStreamId { context: self.context.clone(), purpose: Some(purpose.into()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_can_read_anything() {
        let w = EventStreamId::wildcard();
        let concrete = EventStreamId::concrete("app", "domain");
        assert!(w.can_read(&concrete));
    }

    #[test]
    fn concrete_cannot_read_mismatched_concrete() {
        let a = EventStreamId::concrete("app", "domain");
        let b = EventStreamId::concrete("app", "other");
        assert!(!a.can_read(&b));
    }

    #[test]
    fn wildcard_cannot_append() {
        let w = EventStreamId::wildcard();
        let target = EventStreamId::concrete("app", "domain");
        assert!(!w.can_append_to(&target));
    }

    #[test]
    fn concretization_of_any_purpose_can_append() {
        let any_purpose = EventStreamId::any_purpose("app");
        let concrete = any_purpose.with_purpose("domain-42");
        assert!(concrete.can_append_to(&any_purpose));
        assert!(!any_purpose.can_append_to(&concrete));
    }

    #[test]
    fn equal_ids_can_append() {
        let a = EventStreamId::concrete("app", "domain");
        let b = EventStreamId::concrete("app", "domain");
        assert!(a.can_append_to(&b));
    }
}
