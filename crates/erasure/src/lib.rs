//! Erasure marks (spec.md §4.9, C9): a field-level annotation surface for
//! external GDPR redaction that never disturbs event identity. The core
//! only guarantees marks survive serialization round-trip as metadata
//! discoverable via a schema, and that erasure never touches `reference`,
//! `position`, `tags`, `timestamp`, or `type` — those live on `Event`, never
//! inside `data`, which is the only thing this crate ever touches.
//!
//! Rust has no runtime reflection over a sealed interface's fields, so marks
//! are expressed as a companion descriptor per payload type (spec.md §9
//! Design Notes) rather than attributes discovered at runtime. A type opts
//! in by implementing `ErasureSchema`; `Redactor` consumes the resulting
//! `ErasureDescriptor` to perform the actual field replacement, which is
//! provided here as a reference implementation — *which* redaction tool
//! runs is explicitly out of scope (spec.md Non-goals).

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// One segment-delimited path into a JSON payload, e.g. `address.street` or
/// `contacts.0.email`. Segments are matched against object keys; a numeric
/// segment indexes into an array.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn parse(path: impl AsRef<str>) -> Self {
        Self(path.as_ref().split('.').map(str::to_string).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

/// One of two marks a field can carry (spec.md §4.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErasureMark {
    /// The field's value may be replaced wholesale with a sentinel without
    /// changing event identity.
    Erasable { category: String, purpose: String },
    /// The field's value is composite; a redactor must recurse into it to
    /// find `Erasable` sub-fields (declared as separate, deeper paths in the
    /// same descriptor).
    PartlyErasable,
}

impl ErasureMark {
    pub fn erasable(category: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self::Erasable { category: category.into(), purpose: purpose.into() }
    }

    pub fn partly_erasable() -> Self {
        Self::PartlyErasable
    }

    pub fn is_erasable(&self) -> bool {
        matches!(self, Self::Erasable { .. })
    }
}

/// A per-type map of field paths to erasure marks: the companion descriptor
/// that stands in for reflective field discovery (spec.md §9 Design Notes).
#[derive(Debug, Clone, Default)]
pub struct ErasureDescriptor {
    marks: BTreeMap<FieldPath, ErasureMark>,
}

impl ErasureDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mark(mut self, path: impl Into<FieldPath>, mark: ErasureMark) -> Self {
        self.marks.insert(path.into(), mark);
        self
    }

    pub fn mark_for(&self, path: &FieldPath) -> Option<&ErasureMark> {
        self.marks.get(path)
    }

    /// Every path this descriptor knows about, in a stable order.
    pub fn paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.marks.keys()
    }

    /// Only the paths a reference redactor can act on directly: composite
    /// `PartlyErasable` fields are discovery hints, not executable targets.
    pub fn erasable_paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.marks.iter().filter(|(_, mark)| mark.is_erasable()).map(|(path, _)| path)
    }
}

/// A type whose payload carries erasure marks. Implementors return the same
/// descriptor for every instance; marks are schema-level, not per-value.
pub trait ErasureSchema {
    fn erasure_descriptor() -> ErasureDescriptor;
}

/// Replacement value written in place of an erased field (spec.md §4.9:
/// "null/tombstone/ERASED").
#[derive(Debug, Clone)]
pub enum Sentinel {
    Null,
    Tombstone(String),
}

impl Sentinel {
    pub fn erased() -> Self {
        Self::Tombstone("ERASED".to_string())
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Tombstone(marker) => Value::String(marker.clone()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RedactionError {
    #[error("field path {path} does not resolve to a JSON object at every intermediate segment")]
    UnexpectedShape { path: FieldPath },
}

/// A reference redactor operating on the `Wire` (`serde_json::Value`)
/// representation of an event's `data`. Walks every `Erasable` path in a
/// descriptor and overwrites the value found there with a sentinel, leaving
/// absent paths untouched (optional fields may simply not be present on a
/// given event).
#[derive(Debug, Clone)]
pub struct Redactor {
    sentinel: Sentinel,
}

impl Default for Redactor {
    fn default() -> Self {
        Self { sentinel: Sentinel::erased() }
    }
}

impl Redactor {
    pub fn new(sentinel: Sentinel) -> Self {
        Self { sentinel }
    }

    /// Applies every `Erasable` mark in `descriptor` to `data`, in place.
    /// Returns the number of fields actually replaced (a path absent from
    /// `data`, e.g. an optional field never set, is skipped, not an error).
    pub fn redact(&self, data: &mut Value, descriptor: &ErasureDescriptor) -> Result<usize, RedactionError> {
        let mut redacted = 0;
        for path in descriptor.erasable_paths() {
            if self.redact_path(data, path)? {
                redacted += 1;
            }
        }
        Ok(redacted)
    }

    fn redact_path(&self, data: &mut Value, path: &FieldPath) -> Result<bool, RedactionError> {
        let segments = path.segments();
        let Some((last, parents)) = segments.split_last() else {
            return Ok(false);
        };

        let mut cursor = data;
        for segment in parents {
            cursor = match cursor {
                Value::Object(map) => match map.get_mut(segment) {
                    Some(next) => next,
                    None => return Ok(false),
                },
                Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                    Some(next) => next,
                    None => return Ok(false),
                },
                Value::Null => return Ok(false),
                _ => return Err(RedactionError::UnexpectedShape { path: path.clone() }),
            };
        }

        match cursor {
            Value::Object(map) => {
                if !map.contains_key(last) {
                    return Ok(false);
                }
                map.insert(last.clone(), self.sentinel.to_value());
                Ok(true)
            }
            Value::Array(items) => {
                let Some(index) = last.parse::<usize>().ok() else { return Ok(false) };
                let Some(slot) = items.get_mut(index) else { return Ok(false) };
                *slot = self.sentinel.to_value();
                Ok(true)
            }
            Value::Null => Ok(false),
            _ => Err(RedactionError::UnexpectedShape { path: path.clone() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> ErasureDescriptor {
        ErasureDescriptor::new()
            .with_mark(FieldPath::parse("email"), ErasureMark::erasable("contact", "gdpr-erasure"))
            .with_mark(FieldPath::parse("address"), ErasureMark::partly_erasable())
            .with_mark(FieldPath::parse("address.street"), ErasureMark::erasable("address", "gdpr-erasure"))
    }

    #[test]
    fn erasable_field_is_replaced_with_sentinel() {
        let mut data = json!({"email": "a@example.com", "amount": 800});
        let redacted = Redactor::default().redact(&mut data, &descriptor()).unwrap();
        assert_eq!(redacted, 1);
        assert_eq!(data["email"], json!("ERASED"));
        assert_eq!(data["amount"], json!(800));
    }

    #[test]
    fn partly_erasable_field_is_not_replaced_wholesale_but_nested_path_is() {
        let mut data = json!({"address": {"street": "1 Main St", "city": "Springfield"}});
        let redacted = Redactor::default().redact(&mut data, &descriptor()).unwrap();
        assert_eq!(redacted, 1);
        assert_eq!(data["address"]["street"], json!("ERASED"));
        assert_eq!(data["address"]["city"], json!("Springfield"));
    }

    #[test]
    fn absent_optional_field_is_skipped_without_error() {
        let mut data = json!({"amount": 800});
        let redacted = Redactor::default().redact(&mut data, &descriptor()).unwrap();
        assert_eq!(redacted, 0);
    }

    #[test]
    fn null_sentinel_variant_writes_json_null() {
        let mut data = json!({"email": "a@example.com"});
        let redactor = Redactor::new(Sentinel::Null);
        redactor.redact(&mut data, &descriptor()).unwrap();
        assert_eq!(data["email"], Value::Null);
    }

    #[test]
    fn descriptor_round_trips_as_plain_data_no_runtime_reflection_needed() {
        let descriptor = descriptor();
        let paths: Vec<String> = descriptor.paths().map(ToString::to_string).collect();
        assert!(paths.contains(&"email".to_string()));
        assert!(paths.contains(&"address".to_string()));
        assert!(paths.contains(&"address.street".to_string()));
    }
}
