//! Tags and tag sets (spec.md §3 "Tag set", §4.1).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A `key:value` pair attached to an event for querying.
///
/// Either `key` or `value` may be empty, but never both — `Tag::parse` enforces
/// this at construction and there is no other way to build a malformed `Tag`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    /// Build a tag from already-validated parts. Returns `None` if both parts
    /// are empty.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Option<Self> {
        let key = key.into();
        let value = value.into();
        if key.is_empty() && value.is_empty() {
            None
        } else {
            Some(Self { key, value })
        }
    }

    /// Parse the textual form (`"key:value"`, `"key"`, `":value"`).
    ///
    /// Never throws: malformed or blank input simply yields `None` (spec.md
    /// §4.1, "Failure"). Whitespace is trimmed; fragments that collapse to
    /// empty on both sides are rejected.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        match text.split_once(':') {
            Some((k, v)) => Self::new(k.trim(), v.trim()),
            None => Self::new(text, ""),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}

/// An unordered, deduplicated collection of `Tag`s (spec.md §3 "Tag set").
///
/// Backed by a `BTreeSet` so equality is structural and iteration order is
/// stable, which keeps wire encodings and test fixtures deterministic without
/// claiming any ordering semantics of its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<Tag>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tags(tags: impl IntoIterator<Item = Tag>) -> Self {
        Self(tags.into_iter().collect())
    }

    /// Parse a sequence of textual tags, silently dropping malformed ones.
    pub fn parse_all<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        Self(texts.into_iter().filter_map(Tag::parse).collect())
    }

    pub fn insert(&mut self, tag: Tag) {
        self.0.insert(tag);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.0.contains(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    /// `true` iff every tag in `other` is present in `self` (spec.md §3,
    /// "containsAll is subset check").
    pub fn contains_all(&self, other: &TagSet) -> bool {
        other.0.is_subset(&self.0)
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Self::from_tags(iter)
    }
}

impl IntoIterator for TagSet {
    type Item = Tag;
    type IntoIter = std::collections::btree_set::IntoIter<Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
