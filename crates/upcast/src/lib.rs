//! Upcaster registry (spec.md §4.6): legacy→current transform at the read
//! boundary, plus type-rename tracking for query purposes.

use std::collections::BTreeMap;

use dcb_codec::Wire;
use thiserror::Error;

/// A pure transform from a legacy payload to its current representation.
///
/// Operates at the wire level rather than on concrete Rust types: the
/// registry has no business knowing every legacy/current payload type, only
/// that a `Wire` value produced under `source_type` can be turned into a
/// `Wire` value of `target_type`. Implementations must be idempotent and
/// side-effect-free, and must not capture storage references (spec.md §4.6,
/// §9).
pub trait Upcaster: Send + Sync {
    /// The legacy type name this upcaster reads.
    fn source_type(&self) -> &str;
    /// The current type name this upcaster produces.
    fn target_type(&self) -> &str;
    /// Transform a legacy payload into its current representation.
    fn upcast(&self, legacy: &Wire) -> Result<Wire, UpcastError>;
}

/// A plain function pointer registered as an `Upcaster`, for the common case
/// where no closure state is needed (spec.md §9, "Upcasters as classes").
pub struct FnUpcaster {
    source_type: String,
    target_type: String,
    f: fn(&Wire) -> Result<Wire, UpcastError>,
}

impl FnUpcaster {
    pub fn new(
        source_type: impl Into<String>,
        target_type: impl Into<String>,
        f: fn(&Wire) -> Result<Wire, UpcastError>,
    ) -> Self {
        Self { source_type: source_type.into(), target_type: target_type.into(), f }
    }
}

impl Upcaster for FnUpcaster {
    fn source_type(&self) -> &str {
        &self.source_type
    }

    fn target_type(&self) -> &str {
        &self.target_type
    }

    fn upcast(&self, legacy: &Wire) -> Result<Wire, UpcastError> {
        (self.f)(legacy)
    }
}

#[derive(Debug, Error)]
pub enum UpcastError {
    #[error("upcast of payload failed: {0}")]
    Codec(#[from] dcb_codec::CodecError),
    #[error("upcast transform failed: {0}")]
    Transform(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Registration rule violation: an upcaster's declared target type is
    /// not present in the facade's current root set (spec.md §4.6).
    #[error("upcaster {source_type} -> {target_type} targets a type outside the current root set")]
    TargetNotCurrent { source_type: String, target_type: String },
    #[error("legacy type {0} registered more than once")]
    DuplicateLegacyType(String),
}

/// Maps stored legacy type names to their upcaster. Built once at facade
/// construction time and then used read-only at query time.
pub struct UpcasterRegistry {
    by_source_type: BTreeMap<String, Box<dyn Upcaster>>,
}

impl UpcasterRegistry {
    /// Validate and build a registry. `current_types` is the facade's
    /// enumerated current root set (spec.md §4.5); every upcaster's target
    /// must be a member of it.
    pub fn build(
        current_types: &[String],
        upcasters: Vec<Box<dyn Upcaster>>,
    ) -> Result<Self, RegistryError> {
        let mut by_source_type = BTreeMap::new();
        for upcaster in upcasters {
            if !current_types.iter().any(|t| t == upcaster.target_type()) {
                return Err(RegistryError::TargetNotCurrent {
                    source_type: upcaster.source_type().to_string(),
                    target_type: upcaster.target_type().to_string(),
                });
            }
            if by_source_type.contains_key(upcaster.source_type()) {
                return Err(RegistryError::DuplicateLegacyType(
                    upcaster.source_type().to_string(),
                ));
            }
            by_source_type.insert(upcaster.source_type().to_string(), upcaster);
        }
        Ok(Self { by_source_type })
    }

    pub fn empty() -> Self {
        Self { by_source_type: BTreeMap::new() }
    }

    /// `true` iff `type_name` is a known legacy type (has a registered
    /// upcaster).
    pub fn is_legacy(&self, type_name: &str) -> bool {
        self.by_source_type.contains_key(type_name)
    }

    /// The current type name that `legacy_type` upcasts to, if any.
    pub fn target_of(&self, legacy_type: &str) -> Option<&str> {
        self.by_source_type.get(legacy_type).map(|u| u.target_type())
    }

    /// Every legacy type name whose upcaster targets `current_type`. Used by
    /// the storage/query layer so a query on a current type name
    /// transparently matches stored events of every legacy type that
    /// upcasts to it (spec.md §4.6).
    pub fn legacy_types_targeting<'a>(&'a self, current_type: &'a str) -> Vec<&'a str> {
        self.by_source_type
            .values()
            .filter(|u| u.target_type() == current_type)
            .map(|u| u.source_type())
            .collect()
    }

    /// Read-time behavior of spec.md §4.6: if `stored_type` is a known legacy
    /// type, apply its upcaster to `raw` and return `(targetType, upcasted
    /// payload)`; otherwise returns `None`, meaning the caller should pass
    /// the record through unchanged (`type = storedType`). Operates purely
    /// at the wire level — the domain-typed decode happens above this layer
    /// (see `dcb`), so no `Codec` is needed here.
    pub fn apply(&self, stored_type: &str, raw: &Wire) -> Result<Option<(String, Wire)>, UpcastError> {
        let Some(upcaster) = self.by_source_type.get(stored_type) else {
            return Ok(None);
        };
        let upcasted = upcaster.upcast(raw)?;
        Ok(Some((upcaster.target_type().to_string(), upcasted)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn registered_to_v2(legacy: &Wire) -> Result<Wire, UpcastError> {
        let name = legacy
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| UpcastError::Transform("missing name".into()))?;
        Ok(json!({ "name": { "value": name } }))
    }

    #[test]
    fn build_rejects_target_outside_current_roots() {
        let upcaster = FnUpcaster::new("CustomerRegistered", "CustomerRegisteredV2", registered_to_v2);
        let err = UpcasterRegistry::build(&["SomeOtherType".to_string()], vec![Box::new(upcaster)])
            .unwrap_err();
        assert!(matches!(err, RegistryError::TargetNotCurrent { .. }));
    }

    #[test]
    fn apply_upcasts_legacy_type_and_passes_through_current() {
        let upcaster = FnUpcaster::new("CustomerRegistered", "CustomerRegisteredV2", registered_to_v2);
        let registry = UpcasterRegistry::build(
            &["CustomerRegisteredV2".to_string()],
            vec![Box::new(upcaster)],
        )
        .unwrap();
        let raw = json!({ "name": "John" });

        let (target, upcasted) = registry.apply("CustomerRegistered", &raw).unwrap().unwrap();
        assert_eq!(target, "CustomerRegisteredV2");
        assert_eq!(upcasted["name"]["value"], "John");

        assert!(registry.apply("CustomerChurned", &raw).unwrap().is_none());
    }

    #[test]
    fn legacy_types_targeting_supports_query_rewriting() {
        let upcaster = FnUpcaster::new("CustomerRegistered", "CustomerRegisteredV2", registered_to_v2);
        let registry = UpcasterRegistry::build(
            &["CustomerRegisteredV2".to_string()],
            vec![Box::new(upcaster)],
        )
        .unwrap();
        assert_eq!(registry.legacy_types_targeting("CustomerRegisteredV2"), vec!["CustomerRegistered"]);
        assert!(registry.legacy_types_targeting("Unrelated").is_empty());
    }

    proptest! {
        #[test]
        fn apply_is_deterministic_for_arbitrary_names(name in "[a-zA-Z ]{1,24}") {
            let upcaster = FnUpcaster::new("CustomerRegistered", "CustomerRegisteredV2", registered_to_v2);
            let registry = UpcasterRegistry::build(
                &["CustomerRegisteredV2".to_string()],
                vec![Box::new(upcaster)],
            )
            .unwrap();
            let raw = json!({ "name": name });
            let first = registry.apply("CustomerRegistered", &raw).unwrap();
            let second = registry.apply("CustomerRegistered", &raw).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
