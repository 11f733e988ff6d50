//! Stream facade (spec.md §4.5): a typed view keyed by `(context, purpose)`,
//! with wildcard read and type-admission-on-write.
//!
//! The source relies on reflective enumeration of a sealed interface's
//! permitted subtypes to build the admitted type set. Rust has no runtime
//! reflection over sum types, so per spec.md §9 ("Sealed-sum admission
//! enumeration") this facade takes an explicit list of admitted type
//! descriptors supplied by the caller instead.

use std::collections::BTreeSet;

use dcb_core::EventStreamId;
use dcb_upcast::UpcasterRegistry;
use thiserror::Error;

/// One contribution to a facade's admitted type set (spec.md §4.5).
pub enum RootSpec {
    /// A concrete, leaf payload type — its own single variant.
    Leaf(String),
    /// The enumerated simple names of a closed/sealed sum's variants.
    Sealed(Vec<String>),
}

impl RootSpec {
    fn variant_names(&self) -> Result<Vec<String>, FacadeError> {
        match self {
            Self::Leaf(name) => Ok(vec![name.clone()]),
            Self::Sealed(variants) if variants.is_empty() => Err(FacadeError::SealingRequired),
            Self::Sealed(variants) => Ok(variants.clone()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FacadeError {
    #[error("root type has no known variants and is not itself a leaf payload type")]
    SealingRequired,
    #[error("type name {0} is contributed by more than one root")]
    DuplicateTypeName(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamWriteError {
    #[error("event type {0} is not in the facade's admitted set")]
    InadmissibleType(String),
    #[error("append attempted on a wildcard (non-specific) stream facade")]
    NonSpecificStream,
}

/// A typed view over one `(context, purpose)` stream id (possibly wildcard),
/// restricted to an explicitly enumerated set of admissible event types.
pub struct StreamFacade {
    stream_id: EventStreamId,
    admitted_types: BTreeSet<String>,
    upcasters: UpcasterRegistry,
}

impl StreamFacade {
    /// Enumerate `roots` into the admitted type set, rejecting duplicate
    /// contributions across roots (spec.md §4.5).
    pub fn build(stream_id: EventStreamId, roots: Vec<RootSpec>) -> Result<Self, FacadeError> {
        let mut admitted_types = BTreeSet::new();
        for root in roots {
            for name in root.variant_names()? {
                if !admitted_types.insert(name.clone()) {
                    return Err(FacadeError::DuplicateTypeName(name));
                }
            }
        }
        Ok(Self { stream_id, admitted_types, upcasters: UpcasterRegistry::empty() })
    }

    pub fn with_upcasters(mut self, upcasters: UpcasterRegistry) -> Self {
        self.upcasters = upcasters;
        self
    }

    pub fn stream_id(&self) -> &EventStreamId {
        &self.stream_id
    }

    pub fn upcasters(&self) -> &UpcasterRegistry {
        &self.upcasters
    }

    pub fn admitted_types(&self) -> impl Iterator<Item = &str> {
        self.admitted_types.iter().map(String::as_str)
    }

    /// `true` iff `type_name` is either a current admitted type, or a legacy
    /// type whose upcaster targets one (spec.md §4.6 query semantics).
    pub fn admits_for_read(&self, type_name: &str) -> bool {
        self.admitted_types.contains(type_name) || self.upcasters.is_legacy(type_name)
    }

    /// `true` iff `type_name` may be used to append a new event (current
    /// types only — legacy types are read-only artifacts of the past).
    pub fn admits_for_write(&self, type_name: &str) -> bool {
        self.admitted_types.contains(type_name)
    }

    /// `true` iff this facade can read from `other` (delegates to
    /// `EventStreamId::can_read`, spec.md §3).
    pub fn can_read(&self, other: &EventStreamId) -> bool {
        self.stream_id.can_read(other)
    }

    /// `true` iff this facade is concrete enough to append to.
    pub fn can_append(&self) -> bool {
        self.stream_id.is_concrete()
    }

    /// Validate that `type_name` may be appended through this facade
    /// (spec.md §4.5 "Write operations").
    pub fn check_admission_for_write(&self, type_name: &str) -> Result<(), StreamWriteError> {
        if !self.can_append() {
            return Err(StreamWriteError::NonSpecificStream);
        }
        if !self.admits_for_write(type_name) {
            return Err(StreamWriteError::InadmissibleType(type_name.to_string()));
        }
        Ok(())
    }

    /// Returns a new facade concretized to `purpose`, keeping this facade's
    /// context and admitted types — used for `anyPurpose` streams that need
    /// to append to specific instances (spec.md §4.5).
    pub fn with_purpose(&self, purpose: impl Into<String>) -> StreamFacade {
        StreamFacade {
            stream_id: self.stream_id.with_purpose(purpose),
            admitted_types: self.admitted_types.clone(),
            upcasters: UpcasterRegistry::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_type_name_across_roots_is_rejected() {
        let err = StreamFacade::build(
            EventStreamId::concrete("app", "domain"),
            vec![
                RootSpec::Leaf("AccountOpened".into()),
                RootSpec::Sealed(vec!["AccountOpened".into()]),
            ],
        )
        .unwrap_err();
        assert_eq!(err, FacadeError::DuplicateTypeName("AccountOpened".into()));
    }

    #[test]
    fn wildcard_facade_rejects_append() {
        let facade =
            StreamFacade::build(EventStreamId::any_purpose("app"), vec![RootSpec::Leaf("E".into())])
                .unwrap();
        assert_eq!(
            facade.check_admission_for_write("E").unwrap_err(),
            StreamWriteError::NonSpecificStream
        );
    }

    #[test]
    fn concrete_facade_rejects_inadmissible_type() {
        let facade = StreamFacade::build(
            EventStreamId::concrete("app", "domain"),
            vec![RootSpec::Leaf("AccountOpened".into())],
        )
        .unwrap();
        assert_eq!(
            facade.check_admission_for_write("MoneyDeposited").unwrap_err(),
            StreamWriteError::InadmissibleType("MoneyDeposited".into())
        );
        assert!(facade.check_admission_for_write("AccountOpened").is_ok());
    }

    #[test]
    fn with_purpose_concretizes_and_keeps_admitted_types() {
        let facade = StreamFacade::build(
            EventStreamId::any_purpose("app"),
            vec![RootSpec::Leaf("AccountOpened".into())],
        )
        .unwrap();
        let concretized = facade.with_purpose("domain-42");
        assert!(concretized.can_append());
        assert!(concretized.admits_for_write("AccountOpened"));
    }

    #[test]
    fn sealed_root_with_no_variants_requires_sealing() {
        let err =
            StreamFacade::build(EventStreamId::concrete("app", "domain"), vec![RootSpec::Sealed(vec![])])
                .unwrap_err();
        assert_eq!(err, FacadeError::SealingRequired);
    }
}
