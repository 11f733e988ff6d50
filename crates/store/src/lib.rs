//! Storage port, append engine mechanics, query engine, and notification
//! fabric (spec.md §4.2–§4.4, §4.7).
//!
//! This crate defines the `Storage` trait backends implement (`dcb-store-memory`,
//! `dcb-store-postgres`) plus the backend-independent pieces of the append and
//! query algorithms that every backend assembles its critical section around.

pub mod append_engine;
pub mod direction;
pub mod error;
pub mod notify;
pub mod query_engine;
pub mod storage;

pub use direction::Direction;
pub use error::{AppendError, QueryError};
pub use notify::{
    AppendBatch, AppendNotification, BookmarkListener, BookmarkNotification, ConsistentListener,
    Dispatcher, EventualListener,
};
pub use storage::{EventIterator, PreparedEvent, Storage, StoredEvent, Wire};
