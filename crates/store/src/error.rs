//! Surfaced error taxonomy for the storage port and append/query engines
//! (spec.md §7). Located via `snafu` so a failing backend call carries the
//! call site that triggered it, not just the backend message.

use dcb_core::{EventQuery, EventReference};
use snafu::{Location, Snafu};

/// Errors surfaced by the append engine (C3).
#[derive(Debug, Snafu)]
#[snafu(module(pub), visibility(pub))]
pub enum AppendError {
    #[snafu(display("optimistic lock violated for query {query:?} (expected_last {expected_last:?})"))]
    OptimisticLockViolated {
        query: EventQuery,
        expected_last: Option<EventReference>,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("invalid append batch: {reason}"))]
    InvalidBatch {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("codec round-trip failed while writing event: {reason}"))]
    SerializationError {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("storage backend error: {source}"))]
    StorageError {
        source: Box<dyn std::error::Error + Send + Sync>,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("operation attempted after storage was stopped"))]
    StorageClosed {
        #[snafu(implicit)]
        location: Location,
    },
}

impl AppendError {
    /// Per spec.md §7's retryability column.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OptimisticLockViolated { .. } => true,
            Self::StorageError { .. } => true,
            Self::InvalidBatch { .. }
            | Self::SerializationError { .. }
            | Self::StorageClosed { .. } => false,
        }
    }
}

/// Errors surfaced by the query engine (C4) and the storage port's read
/// operations.
#[derive(Debug, Snafu)]
#[snafu(module(pub), visibility(pub))]
pub enum QueryError {
    #[snafu(display("query would exceed the storage's absolute result limit"))]
    LimitExceeded {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("storage backend error: {source}"))]
    StorageError {
        source: Box<dyn std::error::Error + Send + Sync>,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("operation attempted after storage was stopped"))]
    StorageClosed {
        #[snafu(implicit)]
        location: Location,
    },
}

impl QueryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageError { .. })
    }
}
