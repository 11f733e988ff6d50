//! Bookmarks (spec.md §3 "Bookmark").

use serde::{Deserialize, Serialize};

use crate::id::EventReference;
use crate::tag::TagSet;

/// A persisted cursor for a named reader: `(readerName → EventReference,
/// tags)`. One bookmark per reader name, last-writer-wins (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub reader: String,
    pub reference: EventReference,
    pub tags: TagSet,
}

impl Bookmark {
    pub fn new(reader: impl Into<String>, reference: EventReference, tags: TagSet) -> Self {
        Self { reader: reader.into(), reference, tags }
    }
}
