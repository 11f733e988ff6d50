//! Error mapping for the Postgres backend: sqlx/config failures become
//! `dcb_store::error::{AppendError, QueryError}` at the port boundary, with a
//! small local `ConfigError` for connection/prefix setup.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(module(pub), visibility(pub))]
pub enum ConfigError {
    #[snafu(display("table prefix {prefix:?} must match [A-Za-z0-9_]+_ and be at most 32 chars"))]
    InvalidTablePrefix { prefix: String },

    #[snafu(display("DATABASE_URL is not set"))]
    MissingDatabaseUrl,

    #[snafu(display("failed to connect to postgres: {source}"))]
    Connect { source: sqlx::Error },

    #[snafu(display("failed to apply schema migration: {source}"))]
    Migrate { source: sqlx::Error },
}

pub(crate) fn boxed(error: sqlx::Error) -> Box<dyn std::error::Error + Send + Sync> {
    Box::new(error)
}

/// `PgStorage`'s `Storage` methods are synchronous (spec.md §4.2) but sqlx is
/// async; every method bridges via `tokio::runtime::Handle::block_on`
/// (mirroring `PostgresEventStore`/`PostgresCursorStore` in the teacher's
/// infra crate). This is the error surfaced when no such runtime is current.
#[derive(Debug)]
pub(crate) struct NoRuntimeError;

impl std::fmt::Display for NoRuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PgStorage requires a current Tokio runtime; call from within one")
    }
}

impl std::error::Error for NoRuntimeError {}

pub(crate) fn no_runtime() -> Box<dyn std::error::Error + Send + Sync> {
    Box::new(NoRuntimeError)
}
