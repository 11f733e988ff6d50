//! Tag/query model and event data model for the DCB event store.

pub mod bookmark;
pub mod event;
pub mod id;
pub mod query;
pub mod stream;
pub mod tag;

pub use bookmark::Bookmark;
pub use event::{AppendCriteria, EphemeralEvent, Event};
pub use id::{EmptyEventId, EventId, EventReference};
pub use query::{EventQuery, Matchable, QueryItem, TypeFilter};
pub use stream::EventStreamId;
pub use tag::{Tag, TagSet};
