//! Connection/table configuration for the relational backend (spec.md §6).
//!
//! Deliberately a plain struct with a `Default` impl rather than a
//! config-loading framework — configuration loading is out of scope per
//! spec.md §1 (SPEC_FULL.md §1.3).

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::config_error::InvalidTablePrefixSnafu;
use crate::error::ConfigError;
use snafu::ensure;

/// Table-name prefix rule (spec.md §6): `[A-Za-z0-9_]+_`, max 32 chars
/// including the trailing underscore.
fn valid_prefix(prefix: &str) -> bool {
    prefix.len() <= 32
        && prefix.ends_with('_')
        && prefix[..prefix.len() - 1].chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && prefix.len() > 1
}

#[derive(Debug, Clone)]
pub struct PgStorageConfig {
    /// Substituted into table/function/trigger names so multiple isolated
    /// stores can share one schema (spec.md §6). `None` means no prefix.
    pub table_prefix: Option<String>,
    /// Storage-wide absolute result limit (spec.md §4.2).
    pub absolute_limit: Option<usize>,
    pub max_connections: u32,
}

impl Default for PgStorageConfig {
    fn default() -> Self {
        Self { table_prefix: None, absolute_limit: None, max_connections: 10 }
    }
}

impl PgStorageConfig {
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Result<Self, ConfigError> {
        let prefix = prefix.into();
        ensure!(valid_prefix(&prefix), InvalidTablePrefixSnafu { prefix: prefix.clone() });
        self.table_prefix = Some(prefix);
        Ok(self)
    }

    pub fn with_absolute_limit(mut self, limit: usize) -> Self {
        self.absolute_limit = Some(limit);
        self
    }

    /// `events`/`bookmarks` table names, prefixed per spec.md §6.
    pub fn events_table(&self) -> String {
        format!("{}events", self.table_prefix.as_deref().unwrap_or(""))
    }

    pub fn bookmarks_table(&self) -> String {
        format!("{}bookmarks", self.table_prefix.as_deref().unwrap_or(""))
    }

    pub fn tx_seq(&self) -> String {
        format!("{}events_tx_seq", self.table_prefix.as_deref().unwrap_or(""))
    }

    pub fn appended_channel(&self) -> String {
        format!("{}event_appended", self.table_prefix.as_deref().unwrap_or(""))
    }

    pub fn bookmark_channel(&self) -> String {
        format!("{}bookmark_placed", self.table_prefix.as_deref().unwrap_or(""))
    }

    /// Convenience constructor reading `DATABASE_URL` (spec.md §1.3: the one
    /// place a connection string is read is a test/dev convenience
    /// constructor, not a CLI).
    pub async fn connect_from_env(&self) -> Result<PgPool, ConfigError> {
        let url = std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&url)
            .await
            .map_err(|source| ConfigError::Connect { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_prefix() {
        assert!(PgStorageConfig::default().with_table_prefix("tenant42_").is_ok());
    }

    #[test]
    fn rejects_prefix_without_trailing_underscore() {
        assert!(PgStorageConfig::default().with_table_prefix("tenant42").is_err());
    }

    #[test]
    fn rejects_prefix_with_invalid_characters() {
        assert!(PgStorageConfig::default().with_table_prefix("tenant-42_").is_err());
    }

    #[test]
    fn rejects_prefix_over_32_chars() {
        let long = "a".repeat(32) + "_";
        assert!(PgStorageConfig::default().with_table_prefix(long).is_err());
    }

    #[test]
    fn table_names_use_prefix() {
        let config = PgStorageConfig::default().with_table_prefix("acme_").unwrap();
        assert_eq!(config.events_table(), "acme_events");
        assert_eq!(config.bookmarks_table(), "acme_bookmarks");
    }
}
